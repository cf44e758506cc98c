// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use displaydoc::Display;
use relay_common::error::ErrorKind;
use thiserror::Error;
use tracing::error;

/// Wraps every `sqlx` failure this crate produces. Kept distinct from the
/// component error enums (`auth::AuthError`, `router::RouterError`, ...) so
/// that a storage failure always maps to `ErrorKind::Transient` regardless
/// of which component triggered it (§7 propagation policy).
#[derive(Debug, Error, Display)]
pub enum StorageError {
    /// database error: {0}
    Database(#[from] sqlx::Error),
    /// value failed to (de)serialize: {0}
    Codec(#[from] relay_common::codec::Error),
    /// stored row violates an expected invariant: {0}
    Malformed(&'static str),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        error!(error = %self, "storage error");
        ErrorKind::Transient
    }
}

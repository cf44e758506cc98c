// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use displaydoc::Display;
use relay_common::error::{ErrorKind, HasErrorKind};
use thiserror::Error;

use crate::errors::StorageError;

#[derive(Debug, Error, Display)]
pub enum PushError {
    /// the device has no push token on file
    NoToken,
    /// provider reported the token as no longer registered
    Unregistered,
    /// provider request failed: {0}
    ProviderUnavailable(String),
    /// storage failure: {0}
    Storage(#[from] StorageError),
}

impl HasErrorKind for PushError {
    fn kind(&self) -> ErrorKind {
        match self {
            PushError::NoToken | PushError::Unregistered => ErrorKind::NotFound,
            PushError::ProviderUnavailable(_) => ErrorKind::Transient,
            PushError::Storage(e) => e.kind(),
        }
    }
}

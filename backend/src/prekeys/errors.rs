// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use displaydoc::Display;
use relay_common::error::{ErrorKind, HasErrorKind};
use thiserror::Error;

use crate::errors::StorageError;

#[derive(Debug, Error, Display)]
pub enum PreKeyError {
    /// signed pre-key signature does not verify under the device identity key
    SignatureInvalid,
    /// target user has no active devices
    TargetUnreachable,
    /// storage failure: {0}
    Storage(#[from] StorageError),
}

impl HasErrorKind for PreKeyError {
    fn kind(&self) -> ErrorKind {
        match self {
            PreKeyError::SignatureInvalid => ErrorKind::Fatal,
            PreKeyError::TargetUnreachable => ErrorKind::NotFound,
            PreKeyError::Storage(e) => e.kind(),
        }
    }
}

// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use displaydoc::Display;
use relay_common::error::{ErrorKind, HasErrorKind};
use thiserror::Error;

use crate::errors::StorageError;
use crate::queue::errors::QueueError;

#[derive(Debug, Error, Display)]
pub enum RouterError {
    /// target user or device does not exist
    TargetUnknown,
    /// ciphertext exceeds the configured size limit
    TooLarge,
    /// ciphertext is empty
    Empty,
    /// storage failure: {0}
    Storage(#[from] StorageError),
    /// offline queue failure: {0}
    Queue(#[from] QueueError),
}

impl HasErrorKind for RouterError {
    fn kind(&self) -> ErrorKind {
        match self {
            RouterError::TargetUnknown => ErrorKind::NotFound,
            RouterError::TooLarge | RouterError::Empty => ErrorKind::Validation,
            RouterError::Storage(e) => e.kind(),
            RouterError::Queue(e) => e.kind(),
        }
    }
}

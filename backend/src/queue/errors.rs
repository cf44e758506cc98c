// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use displaydoc::Display;
use relay_common::error::{ErrorKind, HasErrorKind};
use thiserror::Error;

use crate::errors::StorageError;

#[derive(Debug, Error, Display)]
pub enum QueueError {
    /// storage failure: {0}
    Storage(#[from] StorageError),
}

impl HasErrorKind for QueueError {
    fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Storage(e) => e.kind(),
        }
    }
}

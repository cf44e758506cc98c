// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use displaydoc::Display;
use relay_common::error::{ErrorKind, HasErrorKind};
use thiserror::Error;

use crate::errors::StorageError;

#[derive(Debug, Error, Display)]
pub enum AuthError {
    /// phone number is malformed
    InvalidPhoneNumber,
    /// too many verification requests for this phone or source address
    TooManyRequests,
    /// verification code is invalid
    InvalidCode,
    /// verification code has expired
    CodeExpired,
    /// too many failed attempts against this code
    AttemptsExceeded,
    /// presented token does not verify
    InvalidToken,
    /// presented token has expired
    TokenExpired,
    /// token was issued for a different device
    DeviceMismatch,
    /// token or token family has been revoked
    Revoked,
    /// refresh token has already been rotated (possible theft)
    RefreshReplayed,
    /// user already has the maximum number of active devices
    TooManyDevices,
    /// storage failure: {0}
    Storage(#[from] StorageError),
}

impl HasErrorKind for AuthError {
    fn kind(&self) -> ErrorKind {
        match self {
            AuthError::InvalidPhoneNumber => ErrorKind::Validation,
            AuthError::TooManyRequests => ErrorKind::RateLimited,
            AuthError::InvalidCode | AuthError::CodeExpired | AuthError::AttemptsExceeded => {
                ErrorKind::Authentication
            }
            AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::Revoked
            | AuthError::RefreshReplayed => ErrorKind::Authentication,
            AuthError::DeviceMismatch => ErrorKind::Authorization,
            AuthError::TooManyDevices => ErrorKind::Validation,
            AuthError::Storage(e) => e.kind(),
        }
    }
}

// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Translates any component error (`AuthError`, `PreKeyError`, `RouterError`,
//! ...) into an HTTP response via the shared [`relay_common::error::ErrorKind`]
//! vocabulary (§7). Endpoint handlers never match on a component's internal
//! variants; they just `?` into this type.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use relay_common::error::{ErrorKind, HasErrorKind};
use serde::Serialize;

#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    /// For failures with no component error behind them yet, such as a
    /// missing or malformed `Authorization` header.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl<E> From<E> for ApiError
where
    E: HasErrorKind + std::fmt::Display,
{
    fn from(error: E) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.message.clone(),
        })
    }
}

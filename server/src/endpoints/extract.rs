// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bearer-token extraction shared by every endpoint except `/auth/request`
//! and `/auth/verify` (§6.2 "All endpoints... require Authorization: Bearer
//! <access_token>").

use actix_web::http::header::AUTHORIZATION;
use actix_web::HttpRequest;
use relay_common::error::ErrorKind;
use relay_core::auth::tokens::AccessClaims;

use crate::api_error::ApiError;
use crate::state::AppState;

pub async fn authenticate(req: &HttpRequest, state: &AppState) -> Result<AccessClaims, ApiError> {
    let token = bearer_token(req)?;
    Ok(state.authenticator.authenticate_request(&token).await?)
}

pub fn bearer_token(req: &HttpRequest) -> Result<String, ApiError> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or_else(|| ApiError::new(ErrorKind::Authentication, "missing or malformed Authorization header"))
}

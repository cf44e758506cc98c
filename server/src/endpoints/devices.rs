// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `POST /devices/register_push` (§6.2, §4.F): binds a provider push token
//! to the calling device.

use actix_web::{web, HttpRequest, HttpResponse};
use relay_common::identifiers::Platform;
use serde::Deserialize;

use crate::api_error::ApiError;
use crate::state::AppState;

use super::extract;

#[derive(Deserialize)]
pub struct RegisterPushBody {
    #[serde(with = "relay_common::messages::base64_bytes")]
    push_token: Vec<u8>,
    /// Accepted for parity with the client's device record but not acted on
    /// here: a device's platform is fixed at `/auth/register_device`.
    #[allow(dead_code)]
    platform: Platform,
}

pub async fn register_push(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<RegisterPushBody>,
) -> Result<HttpResponse, ApiError> {
    let token = extract::bearer_token(&req)?;
    let claims = state.authenticator.authenticate_request(&token).await?;
    let device_id = claims
        .device_id
        .ok_or_else(|| ApiError::new(relay_common::error::ErrorKind::Authorization, "token is not bound to a device"))?;

    state
        .authenticator
        .register_push_token(&token, device_id, &body.push_token)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

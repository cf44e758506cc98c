// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `/auth/*` (§6.2): phone verification, device registration, and the
//! access/refresh token lifecycle.

use actix_web::{web, HttpRequest, HttpResponse};
use relay_common::crypto::signatures::VerifyingKeyBytes;
use relay_common::identifiers::{DeviceId, Platform, PhoneNumber};
use serde::{Deserialize, Serialize};

use crate::api_error::ApiError;
use crate::state::AppState;

use super::extract;

#[derive(Deserialize)]
pub struct RequestBody {
    phone: String,
}

pub async fn request(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<RequestBody>,
) -> Result<HttpResponse, ApiError> {
    let phone = PhoneNumber::parse(&body.phone)
        .map_err(|_| ApiError::new(relay_common::error::ErrorKind::Validation, "phone number must be in E.164 format"))?;
    let source_address = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    state.authenticator.request_verification(&phone, &source_address).await?;
    Ok(HttpResponse::Accepted().finish())
}

#[derive(Deserialize)]
pub struct VerifyBody {
    phone: String,
    code: String,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    access_token: String,
    refresh_token: String,
    user_id: relay_common::identifiers::UserId,
    user_exists: bool,
}

pub async fn verify(
    state: web::Data<AppState>,
    body: web::Json<VerifyBody>,
) -> Result<HttpResponse, ApiError> {
    let phone = PhoneNumber::parse(&body.phone)
        .map_err(|_| ApiError::new(relay_common::error::ErrorKind::Validation, "phone number must be in E.164 format"))?;
    let session = state.authenticator.verify_code(&phone, &body.code).await?;
    Ok(HttpResponse::Ok().json(VerifyResponse {
        access_token: session.access_token.encoded,
        refresh_token: session.refresh_token_bearer,
        user_id: session.user_id,
        user_exists: session.user_exists,
    }))
}

#[derive(Deserialize)]
pub struct RegisterDeviceBody {
    device_signing_pubkey: VerifyingKeyBytes,
    platform: Platform,
}

#[derive(Serialize)]
pub struct RegisterDeviceResponse {
    device_id: DeviceId,
    access_token: String,
}

pub async fn register_device(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<RegisterDeviceBody>,
) -> Result<HttpResponse, ApiError> {
    let token = extract::bearer_token(&req)?;
    let (device_id, access_token) = state
        .authenticator
        .register_device(&token, body.device_signing_pubkey, body.platform)
        .await?;
    Ok(HttpResponse::Ok().json(RegisterDeviceResponse {
        device_id,
        access_token: access_token.encoded,
    }))
}

#[derive(Deserialize)]
pub struct RefreshBody {
    refresh_token: String,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    access_token: String,
    refresh_token: String,
}

pub async fn refresh(
    state: web::Data<AppState>,
    body: web::Json<RefreshBody>,
) -> Result<HttpResponse, ApiError> {
    let session = state.authenticator.refresh(&body.refresh_token).await?;
    Ok(HttpResponse::Ok().json(RefreshResponse {
        access_token: session.access_token.encoded,
        refresh_token: session.refresh_token_bearer,
    }))
}

pub async fn logout(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let token = extract::bearer_token(&req)?;
    state.authenticator.logout(&token).await?;
    Ok(HttpResponse::NoContent().finish())
}

// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `/keys/*` (§6.2, §4.B): the X3DH pre-key publish/replenish/claim surface.

use actix_web::{web, HttpRequest, HttpResponse};
use relay_common::crypto::agreement::AgreementKeyBytes;
use relay_common::crypto::signatures::{SignatureBytes, VerifyingKeyBytes};
use relay_common::identifiers::UserId;
use relay_core::prekeys::PublishRequest;
use serde::Deserialize;

use crate::api_error::ApiError;
use crate::state::AppState;

use super::extract;

#[derive(Deserialize)]
pub struct SignedPreKeyBody {
    id: i32,
    key: AgreementKeyBytes,
    signature: SignatureBytes,
}

#[derive(Deserialize)]
pub struct PublishBody {
    identity_key: VerifyingKeyBytes,
    signed_prekey: SignedPreKeyBody,
    #[serde(default)]
    one_time_prekeys: Vec<(i32, AgreementKeyBytes)>,
}

pub async fn publish(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<PublishBody>,
) -> Result<HttpResponse, ApiError> {
    let claims = extract::authenticate(&req, &state).await?;
    let device_id = claims
        .device_id
        .ok_or_else(|| ApiError::new(relay_common::error::ErrorKind::Authorization, "token is not bound to a device"))?;

    let body = body.into_inner();
    state
        .prekeys
        .publish_identity(PublishRequest {
            device_id,
            identity_key: body.identity_key,
            signed_prekey_id: body.signed_prekey.id,
            signed_prekey_pubkey: body.signed_prekey.key,
            signed_prekey_signature: body.signed_prekey.signature,
            one_time_prekeys: body.one_time_prekeys,
        })
        .await?;
    Ok(HttpResponse::Created().finish())
}

#[derive(Deserialize)]
pub struct ReplenishBody {
    one_time_prekeys: Vec<(i32, AgreementKeyBytes)>,
}

pub async fn replenish(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<ReplenishBody>,
) -> Result<HttpResponse, ApiError> {
    let claims = extract::authenticate(&req, &state).await?;
    let device_id = claims
        .device_id
        .ok_or_else(|| ApiError::new(relay_common::error::ErrorKind::Authorization, "token is not bound to a device"))?;

    state
        .prekeys
        .replenish(device_id, body.into_inner().one_time_prekeys)
        .await?;
    Ok(HttpResponse::Created().finish())
}

pub async fn bundle(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<UserId>,
) -> Result<HttpResponse, ApiError> {
    extract::authenticate(&req, &state).await?;
    let bundles = state.prekeys.claim_bundle(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(bundles))
}

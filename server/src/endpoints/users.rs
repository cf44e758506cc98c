// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `GET /users/search` (§6.2): phone lookup ahead of a handshake, returning
//! just enough to let the caller start `/keys/bundle/{user_id}`.

use actix_web::{web, HttpRequest, HttpResponse};
use relay_common::crypto::signatures::VerifyingKeyBytes;
use relay_common::identifiers::{PhoneNumber, UserId};
use serde::{Deserialize, Serialize};

use crate::api_error::ApiError;
use crate::state::AppState;

use super::extract;

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
}

#[derive(Serialize)]
pub struct SearchResult {
    user_id: UserId,
    identity_key: VerifyingKeyBytes,
}

/// Only phone-based lookup is backed by a real query (§D non-goals: no
/// username/profile tables); a query that doesn't parse as E.164 simply
/// finds nobody rather than erroring, matching an unrecognized-user search.
pub async fn search(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    extract::authenticate(&req, &state).await?;

    let Ok(phone) = PhoneNumber::parse(&query.q) else {
        return Ok(HttpResponse::Ok().json(Option::<SearchResult>::None));
    };
    let found = state.prekeys.resolve_user_by_phone(&phone).await?;
    Ok(HttpResponse::Ok().json(found.map(|(user_id, identity_key)| SearchResult { user_id, identity_key })))
}

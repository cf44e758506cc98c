// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The persistent-transport endpoint (§4.C, §6.1). Mirrors the teacher's
//! `qs::ws` module layout: `connection` owns the per-socket actor,
//! `registry` is the per-replica dispatch table, `notifier` bridges the
//! maintenance scheduler into it.

pub mod connection;
pub mod messages;
pub mod notifier;
pub mod registry;

use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;

use crate::state::AppState;
use connection::WsConnection;

/// `GET /ws` upgrade handler (§6.1). Authentication happens over the
/// socket itself via the first `Auth` frame, not at the HTTP layer, so a
/// single endpoint serves every device regardless of identity.
pub async fn upgrade_connection(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let connection = WsConnection::new(state.get_ref().clone(), state.registry.clone());
    ws::start(connection, &req, stream)
}

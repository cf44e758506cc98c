// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The transport layer: REST control endpoints (§6.2) and the persistent
//! WebSocket connection manager (§4.C, §6.1) wrapping `relay-core`'s domain
//! logic in an `actix-web` application.

pub mod api_error;
pub mod configurations;
pub mod endpoints;
pub mod state;
pub mod telemetry;
pub mod ws;

use std::net::TcpListener;

use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use tracing_actix_web::TracingLogger;

use state::AppState;

/// Builds the bound, not-yet-running server (§9 composition root pattern):
/// mirrors the teacher's `run(listener, ...)` so tests can bind an
/// ephemeral port and drive the app without going through `main`.
pub fn run(listener: TcpListener, state: AppState) -> Result<Server, std::io::Error> {
    let state = web::Data::new(state);
    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(state.clone())
            .configure(endpoints::configure)
            .route("/ws", web::get().to(ws::upgrade_connection))
    })
    .listen(listener)?
    .run();
    Ok(server)
}

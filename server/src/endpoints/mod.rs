// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The `/api/v1` request-response surface (§6.2). Every handler here goes
//! through the composition root (`AppState`) and translates component
//! errors into an [`crate::api_error::ApiError`] via `?`.

pub mod auth;
pub mod devices;
mod extract;
pub mod health;
pub mod keys;
pub mod users;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::scope("/auth")
                    .route("/request", web::post().to(auth::request))
                    .route("/verify", web::post().to(auth::verify))
                    .route("/register_device", web::post().to(auth::register_device))
                    .route("/refresh", web::post().to(auth::refresh))
                    .route("/logout", web::post().to(auth::logout)),
            )
            .service(
                web::scope("/keys")
                    .route("/publish", web::post().to(keys::publish))
                    .route("/replenish", web::post().to(keys::replenish))
                    .route("/bundle/{user_id}", web::get().to(keys::bundle)),
            )
            .route("/users/search", web::get().to(users::search))
            .route("/devices/register_push", web::post().to(devices::register_push)),
    )
    .route("/health", web::get().to(health::health));
}

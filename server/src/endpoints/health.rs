// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use actix_web::HttpResponse;

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().finish()
}

// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process test scaffolding for `relay-server` integration tests: a
//! `spawn_app` that wires a `#[sqlx::test]` throwaway database into a real
//! `actix-web` server bound to an ephemeral port, plus `TestUser`/`TestApp`
//! helpers that drive the REST and WebSocket surfaces the way a client would.

pub mod utils;

pub use utils::setup::{spawn_app, CapturingSmsDispatcher, TestApp, TestUser};

// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `relay-core`: the replica-shared domain logic of the messaging backend
//! (connection directory, fan-out router, pre-key directory, offline queue,
//! auth state machine, push dispatcher, maintenance scheduler). Transport
//! (HTTP/WS endpoints, `main`) lives in `relay-server`; this crate exposes
//! only plain async APIs over a `PgPool` and a `ConnectionDirectory`, with no
//! knowledge of the wire protocol beyond the shared `relay-common` types.

pub mod audit;
pub mod auth;
pub mod connection_directory;
pub mod errors;
pub mod prekeys;
pub mod push;
pub mod queue;
pub mod rate_limiter;
pub mod router;
pub mod scheduler;
pub mod settings;
pub mod signaling;

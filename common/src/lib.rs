// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire types, identifiers and crypto primitives shared between the relay
//! core (`relay-core`) and the server binary (`relay-server`).
//!
//! This crate carries no networking or storage dependency of its own: it is
//! the vocabulary both sides of the workspace agree on.

pub mod codec;
pub mod crypto;
pub mod error;
pub mod identifiers;
pub mod messages;
pub mod rate_limiter;
pub mod time;

pub const DEFAULT_PORT_HTTP: u16 = 8000;
pub const MAX_ACTIVE_DEVICES_PER_USER: usize = 8;
pub const ONE_TIME_PREKEY_TARGET_POOL_SIZE: usize = 20;
pub const ONE_TIME_PREKEY_LOW_WATERMARK: usize = 10;
pub const MAX_CIPHERTEXT_BYTES: usize = 256 * 1024;

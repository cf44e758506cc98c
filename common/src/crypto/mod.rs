// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Standard primitives only (§1 non-goals: "cryptographic novelty"):
//! X25519 for pre-key agreement material, Ed25519 for identity/device
//! signatures, AES-256-GCM for encryption-at-rest of server-held secrets
//! (push tokens, refresh-token material), HKDF/HMAC-SHA256 for session-token
//! signing and key derivation, Argon2 for verification-code hashing.

pub mod agreement;
pub mod ear;
pub mod hash;
pub mod mac;
pub mod signatures;

// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! X25519 public key material for signed and one-time pre-keys (§3.1, §4.B).
//! The server never performs the Diffie-Hellman computation itself — X3DH is
//! entirely a client-side operation (§1 non-goals). This module only carries
//! the public bytes through publish/claim.

use serde::{Deserialize, Serialize};

/// An X25519 public key (signed pre-key or one-time pre-key), 32 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct AgreementKeyBytes([u8; 32]);

impl AgreementKeyBytes {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// A key generated for tests/fixtures only; the server never holds the
    /// matching private scalar in production.
    #[cfg(any(test, feature = "test_utils"))]
    pub fn random_for_test() -> Self {
        use x25519_dalek::{EphemeralSecret, PublicKey};
        let secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self(*public.as_bytes())
    }
}

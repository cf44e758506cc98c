// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HMAC-SHA256 over a 512-bit secret, used to sign and verify session
//! tokens (§4.A). Verification is constant-time via `subtle`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum MacError {
    #[error("mac does not verify")]
    VerificationFailed,
    #[error("invalid key length")]
    InvalidKeyLength,
}

/// A 512-bit signing secret (§4.A "a new 512-bit secret every N hours").
#[derive(Clone)]
pub struct SigningSecret([u8; 64]);

impl SigningSecret {
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(&self.0).expect("HMAC accepts any key length");
        mac.update(message);
        mac.finalize().into_bytes().into()
    }

    pub fn verify(&self, message: &[u8], tag: &[u8; 32]) -> Result<(), MacError> {
        let expected = self.sign(message);
        if expected.ct_eq(tag).into() {
            Ok(())
        } else {
            Err(MacError::VerificationFailed)
        }
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningSecret(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_succeeds() {
        let secret = SigningSecret::generate();
        let tag = secret.sign(b"token-payload");
        assert!(secret.verify(b"token-payload", &tag).is_ok());
    }

    #[test]
    fn verify_with_wrong_secret_fails() {
        let secret_a = SigningSecret::generate();
        let secret_b = SigningSecret::generate();
        let tag = secret_a.sign(b"token-payload");
        assert!(secret_b.verify(b"token-payload", &tag).is_err());
    }

    #[test]
    fn verify_with_tampered_message_fails() {
        let secret = SigningSecret::generate();
        let tag = secret.sign(b"token-payload");
        assert!(secret.verify(b"token-payload-tampered", &tag).is_err());
    }
}

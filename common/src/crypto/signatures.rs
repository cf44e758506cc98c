// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ed25519 identity/device signing keys (§3.1 "long-term identity public
//! key (Ed25519, 32B)") and the signature over a signed pre-key (§4.B, §3.3
//! "Signed pre-key signature").

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum SignatureError {
    #[error("signature does not verify under the given key")]
    VerificationFailed,
    #[error("malformed key or signature bytes")]
    Malformed,
}

/// An Ed25519 public key: a user's identity key or a device's signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct VerifyingKeyBytes([u8; 32]);

impl VerifyingKeyBytes {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_dalek(self) -> Result<VerifyingKey, SignatureError> {
        VerifyingKey::from_bytes(&self.0).map_err(|_| SignatureError::Malformed)
    }

    /// Verify `signature` over `message` under this key (§3.3, §4.B step 3).
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> Result<(), SignatureError> {
        let key = self.to_dalek()?;
        let sig = DalekSignature::from_bytes(&signature.0);
        key.verify(message, &sig)
            .map_err(|_| SignatureError::VerificationFailed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

/// An Ed25519 signing keypair. Only used by tests/fixtures to mint signed
/// pre-keys — the real identity/device private keys never leave the client.
pub struct SigningKeyPair(SigningKey);

impl SigningKeyPair {
    pub fn generate() -> Self {
        use rand::rngs::OsRng;
        Self(SigningKey::generate(&mut OsRng))
    }

    pub fn verifying_key(&self) -> VerifyingKeyBytes {
        VerifyingKeyBytes(self.0.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes(self.0.sign(message).to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_succeeds() {
        let identity = SigningKeyPair::generate();
        let signature = identity.sign(b"signed-prekey-payload");
        assert!(
            identity
                .verifying_key()
                .verify(b"signed-prekey-payload", &signature)
                .is_ok()
        );
    }

    #[test]
    fn verify_under_wrong_key_fails() {
        let identity_a = SigningKeyPair::generate();
        let identity_b = SigningKeyPair::generate();
        let signature = identity_a.sign(b"signed-prekey-payload");
        assert!(
            identity_b
                .verifying_key()
                .verify(b"signed-prekey-payload", &signature)
                .is_err()
        );
    }
}

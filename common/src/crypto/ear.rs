// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Encryption-at-rest: AES-256-GCM ciphertexts for values the server stores
//! but does not need to operate on in cleartext once persisted (push
//! tokens). Mirrors the teacher's `crypto::ear` module: a key type plus an
//! `EarEncryptable`/`EarDecryptable` pair of traits implemented per payload
//! type.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum EarError {
    #[error("encryption failure")]
    Encryption,
    #[error("decryption failure")]
    Decryption,
}

/// A 256-bit AES-GCM key used to encrypt a single class of at-rest value
/// (e.g. push tokens). Keys are never logged or serialized in debug output.
#[derive(Clone)]
pub struct EarKey(Key<Aes256Gcm>);

impl EarKey {
    pub fn random() -> Self {
        Self(Aes256Gcm::generate_key(&mut OsRng))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(*Key::<Aes256Gcm>::from_slice(&bytes))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EarCiphertext, EarError> {
        let cipher = Aes256Gcm::new(&self.0);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| EarError::Encryption)?;
        let mut bytes = Vec::with_capacity(12 + ciphertext.len());
        bytes.extend_from_slice(nonce.as_slice());
        bytes.extend_from_slice(&ciphertext);
        Ok(EarCiphertext(bytes))
    }

    pub fn decrypt(&self, ciphertext: &EarCiphertext) -> Result<Vec<u8>, EarError> {
        if ciphertext.0.len() < 12 {
            return Err(EarError::Decryption);
        }
        let (nonce_bytes, ciphertext_bytes) = ciphertext.0.split_at(12);
        let cipher = Aes256Gcm::new(&self.0);
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, ciphertext_bytes)
            .map_err(|_| EarError::Decryption)
    }
}

impl std::fmt::Debug for EarKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EarKey(..)")
    }
}

/// `nonce || ciphertext`, stored as a single `bytea` column.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct EarCiphertext(Vec<u8>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = EarKey::random();
        let ciphertext = key.encrypt(b"push-token-material").unwrap();
        let plaintext = key.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, b"push-token-material");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let key_a = EarKey::random();
        let key_b = EarKey::random();
        let ciphertext = key_a.encrypt(b"push-token-material").unwrap();
        assert!(key_b.decrypt(&ciphertext).is_err());
    }
}

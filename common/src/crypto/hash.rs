// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Salted hashing of one-time verification codes (§3.1, §4.A). Argon2 is
//! deliberately expensive: codes are only six digits, so a fast hash would
//! make offline brute force of a leaked row trivial within the 5-minute
//! validity window.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("failed to hash value")]
    Hash,
    #[error("failed to parse stored hash")]
    Parse,
}

/// A salted Argon2 hash of a verification code, stored in place of the code
/// itself (§3.1 "Verification Code... salt-and-hash").
#[derive(Debug, Clone, PartialEq, Eq, sqlx::Type)]
#[sqlx(transparent)]
pub struct SaltedHash(String);

impl SaltedHash {
    pub fn hash(code: &str) -> Result<Self, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(code.as_bytes(), &salt)
            .map_err(|_| HashError::Hash)?;
        Ok(Self(hash.to_string()))
    }

    /// Constant-time comparison is handled internally by `argon2`'s verifier.
    pub fn verify(&self, candidate: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.0) else {
            return false;
        };
        Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_code_verifies() {
        let hash = SaltedHash::hash("482913").unwrap();
        assert!(hash.verify("482913"));
    }

    #[test]
    fn wrong_code_fails() {
        let hash = SaltedHash::hash("482913").unwrap();
        assert!(!hash.verify("000000"));
    }
}

// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared key-hashing for the sliding-window rate limiter (§4.A, §6.3). The
//! counting itself lives in `relay-core::rate_limiter` against the
//! `ConnectionDirectory`-backed KV store; this module only owns the
//! deterministic, collision-resistant key derivation so that the same
//! `(scope, key)` pair always maps to the same KV row.

use sha2::{Digest, Sha256};

/// A opaque, fixed-size rate-limit bucket key, derived from a scope name
/// (e.g. `"verification:phone"`) and an arbitrary set of key parts (e.g. the
/// phone number, or the source address).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    digest: [u8; 32],
}

impl RateLimitKey {
    pub fn new(scope: &str, parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((scope.len() as u32).to_be_bytes());
        hasher.update(scope.as_bytes());
        for part in parts {
            hasher.update((part.len() as u32).to_be_bytes());
            hasher.update(part);
        }
        Self {
            digest: hasher.finalize().into(),
        }
    }

    /// Render as the KV keyspace string `ratelimit:{scope}:{key}` (§6.3).
    pub fn to_kv_key(&self, scope: &str) -> String {
        format!("ratelimit:{scope}:{}", hex::encode(self.digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_hash_identically() {
        let a = RateLimitKey::new("verification:phone", &[b"+15551000001"]);
        let b = RateLimitKey::new("verification:phone", &[b"+15551000001"]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_scopes_hash_differently() {
        let a = RateLimitKey::new("verification:phone", &[b"+15551000001"]);
        let b = RateLimitKey::new("verification:addr", &[b"+15551000001"]);
        assert_ne!(a, b);
    }
}

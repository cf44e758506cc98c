// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bearer token encoding (§3.1 Session Token, §4.A). A token is
//! `base64(claims json) "." hex(hmac tag)`; claims carry the token family
//! id used by `/auth/logout` and the refresh-theft response (§8) to revoke
//! every token derived from one login in a single write.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use relay_common::identifiers::{DeviceId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::signing_secret::SigningSecretPair;

#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum TokenError {
    #[error("token is not validly formed")]
    Malformed,
    #[error("token signature does not verify")]
    BadSignature,
    #[error("token has expired")]
    Expired,
}

/// Claims bound into every access token (§3.1 Session Token attributes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user_id: UserId,
    /// Absent until `register_device` completes (§4.A `verify_code`).
    pub device_id: Option<DeviceId>,
    pub family_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl AccessClaims {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.not_after
    }
}

/// An encoded, signed access token plus its claims, handed back to the
/// caller of `verify_code` / `register_device` / `refresh`.
pub struct AccessToken {
    pub encoded: String,
    pub claims: AccessClaims,
}

pub fn mint(claims: AccessClaims, secrets: &SigningSecretPair) -> AccessToken {
    let payload = serde_json::to_vec(&claims).expect("claims always serialize");
    let payload_b64 = URL_SAFE_NO_PAD.encode(&payload);
    let (tag, _generation) = secrets.sign(payload_b64.as_bytes());
    let encoded = format!("{payload_b64}.{}", hex::encode(tag));
    AccessToken { encoded, claims }
}

/// Verifies the signature (current or previous secret) and expiry, but
/// **not** device binding — callers with an `expected_device_id` must also
/// check `claims.device_id` themselves (§3.3 "Token-device binding").
pub fn verify(token: &str, secrets: &SigningSecretPair) -> Result<AccessClaims, TokenError> {
    let (payload_b64, tag_hex) = token.split_once('.').ok_or(TokenError::Malformed)?;
    let tag_bytes = hex::decode(tag_hex).map_err(|_| TokenError::Malformed)?;
    let tag: [u8; 32] = tag_bytes.try_into().map_err(|_| TokenError::Malformed)?;
    if !secrets.verify(payload_b64.as_bytes(), &tag) {
        return Err(TokenError::BadSignature);
    }
    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| TokenError::Malformed)?;
    let claims: AccessClaims =
        serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;
    if claims.is_expired() {
        return Err(TokenError::Expired);
    }
    Ok(claims)
}

/// Opaque, single-use refresh token material. Only its hash is persisted
/// (§4.A "Refresh tokens are single-use"); the bearer string is returned to
/// the client once and never stored in full.
pub struct RefreshToken {
    pub bearer: String,
    pub hash: Vec<u8>,
}

pub fn mint_refresh_token() -> RefreshToken {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let bearer = URL_SAFE_NO_PAD.encode(bytes);
    RefreshToken {
        hash: hash_refresh_token(&bearer),
        bearer,
    }
}

pub fn hash_refresh_token(bearer: &str) -> Vec<u8> {
    use sha2::{Digest, Sha256};
    Sha256::digest(bearer.as_bytes()).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_common::crypto::mac::SigningSecret;

    fn secrets() -> SigningSecretPair {
        SigningSecretPair::new(SigningSecret::generate())
    }

    fn sample_claims() -> AccessClaims {
        AccessClaims {
            user_id: UserId::random(),
            device_id: Some(DeviceId::random()),
            family_id: Uuid::new_v4(),
            issued_at: Utc::now(),
            not_after: Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn mint_then_verify_roundtrips_claims() {
        let secrets = secrets();
        let claims = sample_claims();
        let user_id = claims.user_id;
        let token = mint(claims, &secrets);
        let verified = verify(&token.encoded, &secrets).unwrap();
        assert_eq!(verified.user_id, user_id);
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let secrets = secrets();
        let token = mint(sample_claims(), &secrets);
        let mut tampered = token.encoded.clone();
        tampered.replace_range(0..4, "Aaaa");
        assert!(verify(&tampered, &secrets).is_err());
    }

    #[test]
    fn verify_rejects_expired_token() {
        let secrets = secrets();
        let mut claims = sample_claims();
        claims.not_after = Utc::now() - chrono::Duration::seconds(1);
        let token = mint(claims, &secrets);
        assert!(matches!(verify(&token.encoded, &secrets), Err(TokenError::Expired)));
    }
}

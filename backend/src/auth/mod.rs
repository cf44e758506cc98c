// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The Session Authenticator (§4.A): phone-verification code exchange,
//! device registration, and the access/refresh token lifecycle, including
//! the dual-key signing-secret rotation window.

pub mod device_record;
pub mod errors;
pub mod refresh;
pub mod signing_secret;
pub mod tokens;
pub mod user_record;
pub mod verification;

use std::sync::Arc;
use std::time::Duration;

use relay_common::crypto::ear::EarKey;
use relay_common::crypto::hash::HashError;
use relay_common::crypto::mac::SigningSecret;
use relay_common::crypto::signatures::VerifyingKeyBytes;
use relay_common::identifiers::{DeviceId, PhoneNumber, Platform, UserId};
use relay_common::MAX_ACTIVE_DEVICES_PER_USER;
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::audit::{AuditEventKind, AuditLog};
use crate::rate_limiter::{RateLimiter, SharedRateLimiter};
use relay_common::rate_limiter::RateLimitKey;

use self::device_record::DeviceRecord;
use self::errors::AuthError;
use self::refresh::RefreshTokenRecord;
use self::signing_secret::SigningSecretPair;
use self::tokens::{AccessClaims, AccessToken};
use self::user_record::UserRecord;
use self::verification::{SmsDispatcher, VerificationCode, MAX_ATTEMPTS};

pub const ACCESS_TOKEN_LIFETIME: chrono::Duration = chrono::Duration::hours(1);
const VERIFICATION_REQUESTS_PER_PHONE_PER_HOUR: u32 = 3;
const VERIFICATION_REQUESTS_PER_SOURCE_PER_HOUR: u32 = 10;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(3600);

/// Outcome of `verify_code` (§4.A).
pub struct VerifiedSession {
    pub access_token: AccessToken,
    pub refresh_token_bearer: String,
    pub user_exists: bool,
    pub user_id: UserId,
}

/// Outcome of `refresh` (§4.A, §8 "refresh-token theft").
pub struct RefreshedSession {
    pub access_token: AccessToken,
    pub refresh_token_bearer: String,
}

/// Composition root for the authentication state machine (§9 "application-
/// scoped composition root"). One instance lives for the process lifetime;
/// the maintenance scheduler (§4.H) holds a reference to call `rotate`.
pub struct Authenticator {
    pool: PgPool,
    signing_secrets: Arc<SigningSecretPair>,
    rate_limiter: SharedRateLimiter,
    sms: Arc<dyn SmsDispatcher>,
    audit: AuditLog,
    /// Encrypts push tokens at rest (§3.1 Device, §4.F); the same key the
    /// push dispatcher decrypts with, shared via the composition root.
    push_token_key: EarKey,
}

impl Authenticator {
    pub fn new(
        pool: PgPool,
        signing_secrets: Arc<SigningSecretPair>,
        rate_limiter: SharedRateLimiter,
        sms: Arc<dyn SmsDispatcher>,
        audit: AuditLog,
        push_token_key: EarKey,
    ) -> Self {
        Self {
            pool,
            signing_secrets,
            rate_limiter,
            sms,
            audit,
            push_token_key,
        }
    }

    pub fn signing_secrets(&self) -> &Arc<SigningSecretPair> {
        &self.signing_secrets
    }

    #[instrument(skip(self, source_address), err)]
    pub async fn request_verification(
        &self,
        phone: &PhoneNumber,
        source_address: &str,
    ) -> Result<(), AuthError> {
        let phone_key = RateLimitKey::new("verification:phone", &[phone.as_str().as_bytes()]);
        let source_key = RateLimitKey::new("verification:source", &[source_address.as_bytes()]);
        let within_phone_limit = self
            .rate_limiter
            .check(
                &phone_key,
                "verification:phone",
                VERIFICATION_REQUESTS_PER_PHONE_PER_HOUR,
                RATE_LIMIT_WINDOW,
            )
            .await
            .map_err(|_| AuthError::TooManyRequests)?;
        let within_source_limit = self
            .rate_limiter
            .check(
                &source_key,
                "verification:source",
                VERIFICATION_REQUESTS_PER_SOURCE_PER_HOUR,
                RATE_LIMIT_WINDOW,
            )
            .await
            .map_err(|_| AuthError::TooManyRequests)?;
        if !within_phone_limit || !within_source_limit {
            self.audit
                .record(
                    AuditEventKind::VerificationFailed,
                    None,
                    None,
                    Some(source_address),
                    Some("rate_limited"),
                )
                .await;
            return Err(AuthError::TooManyRequests);
        }

        let code = verification::generate_code();
        let record = VerificationCode::new(phone.clone(), &code)
            .map_err(hash_error_is_fatal)?;
        record.upsert(&self.pool).await?;

        // SMS dispatcher errors are fatal to the request (§4.A): the code
        // exists only in SMS and the hashed row, so a failed send must not
        // silently report success.
        self.sms
            .send(phone, &code)
            .await
            .map_err(|_| AuthError::TooManyRequests)?;

        self.audit
            .record(AuditEventKind::VerificationRequested, None, None, Some(source_address), None)
            .await;
        Ok(())
    }

    #[instrument(skip(self, code), err)]
    pub async fn verify_code(
        &self,
        phone: &PhoneNumber,
        code: &str,
    ) -> Result<VerifiedSession, AuthError> {
        let record = VerificationCode::load(&self.pool, phone)
            .await?
            .ok_or(AuthError::InvalidCode)?;
        if record.consumed {
            return Err(AuthError::InvalidCode);
        }
        if record.is_expired() {
            return Err(AuthError::CodeExpired);
        }
        if record.attempts >= MAX_ATTEMPTS {
            return Err(AuthError::AttemptsExceeded);
        }
        if !record.salted_hash.verify(code) {
            VerificationCode::record_failed_attempt(&self.pool, phone).await?;
            self.audit
                .record(AuditEventKind::VerificationFailed, None, None, None, Some("bad_code"))
                .await;
            return Err(AuthError::InvalidCode);
        }
        VerificationCode::mark_consumed(&self.pool, phone).await?;

        let (user, user_exists) = match UserRecord::load_by_phone(&self.pool, phone).await? {
            Some(user) => (user, true),
            None => {
                // Placeholder identity key until the first `register_device`
                // call supplies the device-bound signing key; the identity
                // key itself is supplied by the client at the same step in
                // real deployments backed by a richer profile flow, which is
                // out of scope here (§1 auxiliary tables).
                let user = UserRecord::new(phone.clone(), VerifyingKeyBytes::from_bytes([0u8; 32]));
                user.store(&self.pool).await?;
                (user, false)
            }
        };

        let family_id = Uuid::new_v4();
        let claims = AccessClaims {
            user_id: user.user_id,
            device_id: None,
            family_id,
            issued_at: relay_common::time::now(),
            not_after: relay_common::time::now() + ACCESS_TOKEN_LIFETIME,
        };
        let access_token = tokens::mint(claims, &self.signing_secrets);
        let refresh = tokens::mint_refresh_token();
        RefreshTokenRecord {
            token_hash: refresh.hash,
            family_id,
            user_id: user.user_id,
            device_id: None,
            expires_at: relay_common::time::now() + refresh::REFRESH_TOKEN_LIFETIME,
            used_at: None,
        }
        .store(&self.pool)
        .await?;

        self.audit
            .record(AuditEventKind::VerificationSucceeded, Some(user.user_id), None, None, None)
            .await;

        Ok(VerifiedSession {
            access_token,
            refresh_token_bearer: refresh.bearer,
            user_exists,
            user_id: user.user_id,
        })
    }

    #[instrument(skip(self, presented_token), err)]
    pub async fn register_device(
        &self,
        presented_token: &str,
        device_signing_pubkey: VerifyingKeyBytes,
        platform: Platform,
    ) -> Result<(DeviceId, AccessToken), AuthError> {
        let claims = self.validate_raw(presented_token).await?;
        let active_devices = DeviceRecord::count_for_user(&self.pool, claims.user_id).await?;
        if active_devices >= MAX_ACTIVE_DEVICES_PER_USER as i64 {
            return Err(AuthError::TooManyDevices);
        }

        let device = DeviceRecord::new(claims.user_id, device_signing_pubkey, platform);
        device.store(&self.pool).await?;

        let new_claims = AccessClaims {
            user_id: claims.user_id,
            device_id: Some(device.device_id),
            family_id: claims.family_id,
            issued_at: relay_common::time::now(),
            not_after: relay_common::time::now() + ACCESS_TOKEN_LIFETIME,
        };
        let access_token = tokens::mint(new_claims, &self.signing_secrets);
        self.audit
            .record(
                AuditEventKind::DeviceRegistered,
                Some(claims.user_id),
                Some(device.device_id),
                None,
                None,
            )
            .await;
        Ok((device.device_id, access_token))
    }

    /// `register_push` (§6.2, §4.F): encrypts the provider token at rest
    /// and binds it to the caller's own device.
    #[instrument(skip(self, presented_token, push_token), err)]
    pub async fn register_push_token(
        &self,
        presented_token: &str,
        device_id: DeviceId,
        push_token: &[u8],
    ) -> Result<(), AuthError> {
        self.validate(presented_token, device_id).await?;
        let ciphertext = self
            .push_token_key
            .encrypt(push_token)
            .map_err(|_| AuthError::Storage(crate::errors::StorageError::Malformed(
                "failed to encrypt push token",
            )))?;
        DeviceRecord::set_push_token(&self.pool, device_id, Some(&ciphertext)).await?;
        Ok(())
    }

    #[instrument(skip(self, presented_refresh_token), err)]
    pub async fn refresh(&self, presented_refresh_token: &str) -> Result<RefreshedSession, AuthError> {
        let hash = tokens::hash_refresh_token(presented_refresh_token);
        let Some(record) = RefreshTokenRecord::load_by_hash(&self.pool, &hash).await? else {
            // The token isn't the currently-valid one for its family. We
            // cannot tell from the hash alone whether it was already
            // rotated or never existed, so we treat any unknown refresh
            // token presentation conservatively: if we can recover no
            // family to revoke, surface a plain invalid-token error.
            return Err(AuthError::InvalidToken);
        };

        if record.used_at.is_some() {
            // Presenting a refresh token that already rotated is suspected
            // theft (§4.A, §8): revoke every token derived from its login.
            self.revoke_family_on_suspected_theft(record.family_id).await?;
            return Err(AuthError::InvalidToken);
        }

        if relay_common::time::now() > record.expires_at {
            refresh::persistence::revoke_family(&self.pool, record.family_id).await?;
            return Err(AuthError::TokenExpired);
        }

        // Single-use: mark the presented token's row used before minting the
        // next one so a concurrent replay of the same bearer string cannot
        // also succeed (§4.A, §8 refresh-token theft round-trip law).
        if !RefreshTokenRecord::mark_used_by_hash(&self.pool, &hash).await? {
            // Someone else redeemed this exact token between our load and
            // this update: the same suspected-theft race.
            self.revoke_family_on_suspected_theft(record.family_id).await?;
            return Err(AuthError::InvalidToken);
        }

        let claims = AccessClaims {
            user_id: record.user_id,
            device_id: record.device_id,
            family_id: record.family_id,
            issued_at: relay_common::time::now(),
            not_after: relay_common::time::now() + ACCESS_TOKEN_LIFETIME,
        };
        let access_token = tokens::mint(claims, &self.signing_secrets);
        let new_refresh = tokens::mint_refresh_token();
        RefreshTokenRecord {
            token_hash: new_refresh.hash,
            family_id: record.family_id,
            user_id: record.user_id,
            device_id: record.device_id,
            expires_at: relay_common::time::now() + refresh::REFRESH_TOKEN_LIFETIME,
            used_at: None,
        }
        .store(&self.pool)
        .await?;

        self.audit
            .record(AuditEventKind::TokenRefreshed, Some(record.user_id), record.device_id, None, None)
            .await;
        Ok(RefreshedSession {
            access_token,
            refresh_token_bearer: new_refresh.bearer,
        })
    }

    /// Reports a refresh-token replay: the caller already holds evidence
    /// (e.g. the presented token hashes to a row that no longer exists but
    /// its family is still live) that a retired refresh token was reused.
    /// Revokes the whole family (§8 "refresh-token theft").
    pub async fn revoke_family_on_suspected_theft(&self, family_id: Uuid) -> Result<(), AuthError> {
        refresh::persistence::revoke_family(&self.pool, family_id).await?;
        RefreshTokenRecord::delete_family(&self.pool, family_id).await?;
        warn!(%family_id, "revoked token family on suspected refresh-token replay");
        self.audit
            .record(AuditEventKind::RefreshTokenReplayed, None, None, None, Some("family_revoked"))
            .await;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn logout(&self, presented_token: &str) -> Result<(), AuthError> {
        let claims = self.validate_raw(presented_token).await?;
        refresh::persistence::revoke_family(&self.pool, claims.family_id).await?;
        RefreshTokenRecord::delete_family(&self.pool, claims.family_id).await?;
        self.audit
            .record(AuditEventKind::Logout, Some(claims.user_id), claims.device_id, None, None)
            .await;
        Ok(())
    }

    /// `validate(presented_token, expected_device_id)` (§4.A).
    #[instrument(skip(self, presented_token), err)]
    pub async fn validate(
        &self,
        presented_token: &str,
        expected_device_id: DeviceId,
    ) -> Result<AccessClaims, AuthError> {
        let claims = self.validate_raw(presented_token).await?;
        match claims.device_id {
            Some(device_id) if device_id == expected_device_id => Ok(claims),
            _ => Err(AuthError::DeviceMismatch),
        }
    }

    /// Validates a bearer token without binding it to a specific device
    /// (§6.2): the REST control endpoints authenticate the caller from the
    /// token alone, unlike the WS handshake which also checks the device id
    /// presented in the `Auth` frame against the token's claims.
    #[instrument(skip(self, presented_token), err)]
    pub async fn authenticate_request(&self, presented_token: &str) -> Result<AccessClaims, AuthError> {
        self.validate_raw(presented_token).await
    }

    async fn validate_raw(&self, presented_token: &str) -> Result<AccessClaims, AuthError> {
        let claims = tokens::verify(presented_token, &self.signing_secrets).map_err(|e| match e {
            tokens::TokenError::Expired => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?;
        if refresh::persistence::is_family_revoked(&self.pool, claims.family_id).await? {
            return Err(AuthError::Revoked);
        }
        Ok(claims)
    }

    /// §4.A rotation: generates a fresh 512-bit secret and installs it.
    /// Called by the maintenance scheduler (§4.H) on its configured period.
    pub fn rotate_signing_secret(&self) {
        self.signing_secrets.rotate(SigningSecret::generate());
        info!(generation = self.signing_secrets.current_generation(), "rotated token signing secret");
    }
}

fn hash_error_is_fatal(_error: HashError) -> AuthError {
    // Hashing a freshly generated 6-digit code cannot fail in practice; if
    // the argon2 backend ever does, surface it as a token-signing-class
    // fatal rather than silently accepting an unhashed code.
    AuthError::Storage(crate::errors::StorageError::Malformed(
        "failed to hash verification code",
    ))
}

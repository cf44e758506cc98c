// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The `verification_codes` table (§3.1 Verification Code, §4.A) and the
//! SMS dispatcher boundary. SMS delivery is out of scope (§1) — callers
//! provide any `SmsDispatcher` implementation; `test_harness` and
//! `DEV_MODE` deployments use [`NullSmsDispatcher`], which never sends and
//! instead lets the caller read the code back directly (§6.4).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_common::crypto::hash::SaltedHash;
use relay_common::identifiers::PhoneNumber;
use sqlx::PgExecutor;

use crate::errors::StorageError;

#[derive(Debug, Clone)]
pub struct VerificationCode {
    pub phone: PhoneNumber,
    pub salted_hash: SaltedHash,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: i32,
    pub consumed: bool,
}

pub const CODE_LIFETIME: chrono::Duration = chrono::Duration::minutes(5);
pub const MAX_ATTEMPTS: i32 = 5;

impl VerificationCode {
    pub fn new(phone: PhoneNumber, code: &str) -> Result<Self, relay_common::crypto::hash::HashError> {
        let now = Utc::now();
        Ok(Self {
            phone,
            salted_hash: SaltedHash::hash(code)?,
            created_at: now,
            expires_at: now + CODE_LIFETIME,
            attempts: 0,
            consumed: false,
        })
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Generates a fresh 6-digit code (§3.1). Uses the OS RNG, not a
/// cryptographic KDF — the code itself is never the security boundary, the
/// salted hash and 5-attempt lockout are.
pub fn generate_code() -> String {
    use rand::Rng;
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// External collaborator boundary (§1 "SMS code delivery... out of scope").
#[async_trait]
pub trait SmsDispatcher: Send + Sync {
    async fn send(&self, phone: &PhoneNumber, code: &str) -> Result<(), SmsError>;
}

#[derive(Debug, thiserror::Error)]
#[error("sms dispatch failed: {0}")]
pub struct SmsError(pub String);

/// Dev-mode stand-in (§6.4 `DEV_MODE`): never sends, the code is surfaced
/// in the API response by the caller instead. The server binary refuses to
/// wire this in outside `local` (§6.4 "must be a startup error").
pub struct NullSmsDispatcher;

#[async_trait]
impl SmsDispatcher for NullSmsDispatcher {
    async fn send(&self, _phone: &PhoneNumber, _code: &str) -> Result<(), SmsError> {
        Ok(())
    }
}

pub(crate) mod persistence {
    use super::*;

    impl VerificationCode {
        /// New request supersedes any outstanding code for the phone (§3.1
        /// "at most one outstanding code per phone").
        pub(crate) async fn upsert(&self, connection: impl PgExecutor<'_>) -> Result<(), StorageError> {
            sqlx::query!(
                r#"INSERT INTO verification_codes (phone, salted_hash, created_at, expires_at, attempts, consumed)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (phone) DO UPDATE SET
                    salted_hash = EXCLUDED.salted_hash,
                    created_at = EXCLUDED.created_at,
                    expires_at = EXCLUDED.expires_at,
                    attempts = 0,
                    consumed = false"#,
                self.phone.as_str(),
                self.salted_hash as _,
                self.created_at,
                self.expires_at,
                self.attempts,
                self.consumed,
            )
            .execute(connection)
            .await?;
            Ok(())
        }

        pub(crate) async fn load(
            connection: impl PgExecutor<'_>,
            phone: &PhoneNumber,
        ) -> Result<Option<VerificationCode>, StorageError> {
            let row = sqlx::query!(
                r#"SELECT phone, salted_hash as "salted_hash: SaltedHash",
                    created_at, expires_at, attempts, consumed
                FROM verification_codes WHERE phone = $1"#,
                phone.as_str(),
            )
            .fetch_optional(connection)
            .await?;
            let Some(row) = row else {
                return Ok(None);
            };
            Ok(Some(VerificationCode {
                phone: phone.clone(),
                salted_hash: row.salted_hash,
                created_at: row.created_at,
                expires_at: row.expires_at,
                attempts: row.attempts,
                consumed: row.consumed,
            }))
        }

        pub(crate) async fn record_failed_attempt(
            connection: impl PgExecutor<'_>,
            phone: &PhoneNumber,
        ) -> Result<(), StorageError> {
            sqlx::query!(
                "UPDATE verification_codes SET attempts = attempts + 1 WHERE phone = $1",
                phone.as_str(),
            )
            .execute(connection)
            .await?;
            Ok(())
        }

        pub(crate) async fn mark_consumed(
            connection: impl PgExecutor<'_>,
            phone: &PhoneNumber,
        ) -> Result<(), StorageError> {
            sqlx::query!(
                "UPDATE verification_codes SET consumed = true WHERE phone = $1",
                phone.as_str(),
            )
            .execute(connection)
            .await?;
            Ok(())
        }

        /// §4.H "expire verification codes" sweep.
        pub(crate) async fn expire(connection: impl PgExecutor<'_>) -> Result<u64, StorageError> {
            let result = sqlx::query!("DELETE FROM verification_codes WHERE expires_at < now()")
                .execute(connection)
                .await?;
            Ok(result.rows_affected())
        }
    }
}

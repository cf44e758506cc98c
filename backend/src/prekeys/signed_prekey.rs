// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The `signed_prekeys` table (§3.1 Signed Pre-Key). Exactly one row per
//! device has `replaced_at IS NULL` at any moment — that is the "current"
//! signed pre-key; the one it replaced keeps its row, stamped with
//! `replaced_at`, and stays valid for the 24h overlap window (§3.1).

use chrono::{DateTime, Duration, Utc};
use relay_common::crypto::agreement::AgreementKeyBytes;
use relay_common::crypto::signatures::{SignatureBytes, VerifyingKeyBytes};
use relay_common::identifiers::DeviceId;
use sqlx::PgExecutor;

use crate::errors::StorageError;

pub const SIGNED_PREKEY_LIFETIME: Duration = Duration::days(7);
pub const OVERLAP_WINDOW: Duration = Duration::hours(24);

#[derive(Debug, Clone)]
pub struct SignedPreKeyRecord {
    pub device_id: DeviceId,
    pub key_id: i32,
    pub pubkey: AgreementKeyBytes,
    pub signature: SignatureBytes,
    pub created_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub replaced_at: Option<DateTime<Utc>>,
}

impl SignedPreKeyRecord {
    pub fn new(device_id: DeviceId, key_id: i32, pubkey: AgreementKeyBytes, signature: SignatureBytes) -> Self {
        let now = Utc::now();
        Self {
            device_id,
            key_id,
            pubkey,
            signature,
            created_at: now,
            valid_until: now + SIGNED_PREKEY_LIFETIME,
            replaced_at: None,
        }
    }

    /// Whether this row still counts as live: the true current, or a
    /// previous one still inside its overlap window (§3.1, §3.3).
    pub fn is_live(&self) -> bool {
        match self.replaced_at {
            None => true,
            Some(replaced_at) => Utc::now() <= replaced_at + OVERLAP_WINDOW,
        }
    }

    /// Signature verification against the device identity key, required
    /// both at upload and at claim time (§3.3).
    pub fn verify_signature(&self, identity_key: &VerifyingKeyBytes) -> bool {
        identity_key
            .verify(&signing_payload(self.key_id, &self.pubkey), &self.signature)
            .is_ok()
    }
}

/// Builds the byte string a client signs over when publishing a signed
/// pre-key.
pub fn signing_payload(key_id: i32, pubkey: &AgreementKeyBytes) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + 32);
    payload.extend_from_slice(&key_id.to_be_bytes());
    payload.extend_from_slice(pubkey.as_bytes());
    payload
}

pub(crate) mod persistence {
    use super::*;

    impl SignedPreKeyRecord {
        pub(crate) async fn store(&self, connection: impl PgExecutor<'_>) -> Result<(), StorageError> {
            sqlx::query!(
                r#"INSERT INTO signed_prekeys
                    (device_id, key_id, pubkey, signature, created_at, valid_until, replaced_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
                self.device_id.as_uuid(),
                self.key_id,
                self.pubkey.as_bytes().as_slice(),
                self.signature.as_bytes().as_slice(),
                self.created_at,
                self.valid_until,
                self.replaced_at,
            )
            .execute(connection)
            .await?;
            Ok(())
        }

        pub(crate) async fn mark_replaced(
            connection: impl PgExecutor<'_>,
            device_id: DeviceId,
            key_id: i32,
        ) -> Result<(), StorageError> {
            sqlx::query!(
                "UPDATE signed_prekeys SET replaced_at = now() WHERE device_id = $1 AND key_id = $2",
                device_id.as_uuid(),
                key_id,
            )
            .execute(connection)
            .await?;
            Ok(())
        }

        pub(crate) async fn load_current(
            connection: impl PgExecutor<'_>,
            device_id: DeviceId,
        ) -> Result<Option<SignedPreKeyRecord>, StorageError> {
            let row = sqlx::query!(
                r#"SELECT device_id, key_id, pubkey, signature, created_at, valid_until, replaced_at
                FROM signed_prekeys WHERE device_id = $1 AND replaced_at IS NULL"#,
                device_id.as_uuid(),
            )
            .fetch_optional(connection)
            .await?;
            let Some(row) = row else {
                return Ok(None);
            };
            Ok(Some(SignedPreKeyRecord {
                device_id: DeviceId::from_uuid(row.device_id),
                key_id: row.key_id,
                pubkey: AgreementKeyBytes::from_bytes(
                    row.pubkey
                        .try_into()
                        .map_err(|_| StorageError::Malformed("signed_prekeys.pubkey is not 32 bytes"))?,
                ),
                signature: SignatureBytes::from_bytes(row.signature.try_into().map_err(|_| {
                    StorageError::Malformed("signed_prekeys.signature is not 64 bytes")
                })?),
                created_at: row.created_at,
                valid_until: row.valid_until,
                replaced_at: row.replaced_at,
            }))
        }

        /// §4.H "notify key rotation need": devices whose current signed
        /// pre-key predates the lifetime.
        pub(crate) async fn load_stale_device_ids(
            connection: impl PgExecutor<'_>,
        ) -> Result<Vec<DeviceId>, StorageError> {
            let rows = sqlx::query!(
                r#"SELECT device_id FROM signed_prekeys
                WHERE replaced_at IS NULL AND created_at < now() - interval '7 days'"#,
            )
            .fetch_all(connection)
            .await?;
            Ok(rows.into_iter().map(|row| DeviceId::from_uuid(row.device_id)).collect())
        }
    }
}

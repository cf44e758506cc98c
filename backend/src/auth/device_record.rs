// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The `devices` table (§3.1 Device, §6.3). Push tokens are encrypted at
//! rest with the server's `EarKey` (§B ambient stack) since they are the
//! one piece of device state the server holds but never needs to read in
//! cleartext once persisted, besides handing it back to the push provider.

use chrono::{DateTime, Utc};
use relay_common::crypto::ear::{EarCiphertext, EarKey};
use relay_common::crypto::signatures::VerifyingKeyBytes;
use relay_common::identifiers::{DeviceId, Platform, UserId};
use sqlx::PgExecutor;

use crate::errors::StorageError;

#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub user_id: UserId,
    pub signing_pubkey: VerifyingKeyBytes,
    pub platform: Platform,
    pub push_token: Option<EarCiphertext>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl DeviceRecord {
    pub fn new(user_id: UserId, signing_pubkey: VerifyingKeyBytes, platform: Platform) -> Self {
        let now = Utc::now();
        Self {
            device_id: DeviceId::random(),
            user_id,
            signing_pubkey,
            platform,
            push_token: None,
            created_at: now,
            last_seen_at: now,
        }
    }

    fn signing_key_from_column(bytes: Vec<u8>) -> Result<VerifyingKeyBytes, StorageError> {
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| StorageError::Malformed("devices.signing_pubkey is not 32 bytes"))?;
        Ok(VerifyingKeyBytes::from_bytes(array))
    }

    /// Decrypts the stored push token, if any (§4.F push dispatch).
    pub fn decrypt_push_token(&self, key: &EarKey) -> Option<Vec<u8>> {
        self.push_token.as_ref().and_then(|ct| key.decrypt(ct).ok())
    }
}

pub(crate) mod persistence {
    use super::*;

    impl DeviceRecord {
        pub(crate) async fn store(&self, connection: impl PgExecutor<'_>) -> Result<(), StorageError> {
            sqlx::query!(
                r#"INSERT INTO devices
                    (device_id, user_id, signing_pubkey, platform, push_token, created_at, last_seen_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
                self.device_id.as_uuid(),
                self.user_id.as_uuid(),
                self.signing_pubkey.as_bytes().as_slice(),
                self.platform as Platform,
                self.push_token.as_ref() as Option<&EarCiphertext>,
                self.created_at,
                self.last_seen_at,
            )
            .execute(connection)
            .await?;
            Ok(())
        }

        pub(crate) async fn load(
            connection: impl PgExecutor<'_>,
            device_id: DeviceId,
        ) -> Result<Option<DeviceRecord>, StorageError> {
            let row = sqlx::query!(
                r#"SELECT device_id, user_id, signing_pubkey,
                    platform as "platform: Platform",
                    push_token as "push_token: EarCiphertext",
                    created_at, last_seen_at
                FROM devices WHERE device_id = $1"#,
                device_id.as_uuid(),
            )
            .fetch_optional(connection)
            .await?;
            let Some(row) = row else {
                return Ok(None);
            };
            Ok(Some(DeviceRecord {
                device_id: DeviceId::from_uuid(row.device_id),
                user_id: UserId::from_uuid(row.user_id),
                signing_pubkey: DeviceRecord::signing_key_from_column(row.signing_pubkey)?,
                platform: row.platform,
                push_token: row.push_token,
                created_at: row.created_at,
                last_seen_at: row.last_seen_at,
            }))
        }

        /// Every device belonging to `user_id`, active-devices-count bound
        /// enforced by the caller (§3.1 "a user may have ≤ 8 active devices").
        pub(crate) async fn load_for_user(
            connection: impl PgExecutor<'_> + Copy,
            user_id: UserId,
        ) -> Result<Vec<DeviceRecord>, StorageError> {
            let rows = sqlx::query!(
                r#"SELECT device_id, user_id, signing_pubkey,
                    platform as "platform: Platform",
                    push_token as "push_token: EarCiphertext",
                    created_at, last_seen_at
                FROM devices WHERE user_id = $1"#,
                user_id.as_uuid(),
            )
            .fetch_all(connection)
            .await?;
            rows.into_iter()
                .map(|row| {
                    Ok(DeviceRecord {
                        device_id: DeviceId::from_uuid(row.device_id),
                        user_id: UserId::from_uuid(row.user_id),
                        signing_pubkey: DeviceRecord::signing_key_from_column(row.signing_pubkey)?,
                        platform: row.platform,
                        push_token: row.push_token,
                        created_at: row.created_at,
                        last_seen_at: row.last_seen_at,
                    })
                })
                .collect()
        }

        pub(crate) async fn count_for_user(
            connection: impl PgExecutor<'_>,
            user_id: UserId,
        ) -> Result<i64, StorageError> {
            let count = sqlx::query_scalar!(
                "SELECT COUNT(*) FROM devices WHERE user_id = $1",
                user_id.as_uuid(),
            )
            .fetch_one(connection)
            .await?;
            Ok(count.unwrap_or(0))
        }

        pub(crate) async fn touch_last_seen(
            connection: impl PgExecutor<'_>,
            device_id: DeviceId,
        ) -> Result<(), StorageError> {
            sqlx::query!(
                "UPDATE devices SET last_seen_at = now() WHERE device_id = $1",
                device_id.as_uuid(),
            )
            .execute(connection)
            .await?;
            Ok(())
        }

        pub(crate) async fn set_push_token(
            connection: impl PgExecutor<'_>,
            device_id: DeviceId,
            push_token: Option<&EarCiphertext>,
        ) -> Result<(), StorageError> {
            sqlx::query!(
                "UPDATE devices SET push_token = $1 WHERE device_id = $2",
                push_token,
                device_id.as_uuid(),
            )
            .execute(connection)
            .await?;
            Ok(())
        }

        /// Invoked by the push dispatcher when a provider reports the token
        /// unregistered (§4.F "cause the token to be removed").
        pub(crate) async fn clear_push_token(
            connection: impl PgExecutor<'_>,
            device_id: DeviceId,
        ) -> Result<(), StorageError> {
            Self::set_push_token(connection, device_id, None).await
        }

        pub(crate) async fn delete(
            connection: impl PgExecutor<'_>,
            device_id: DeviceId,
        ) -> Result<(), StorageError> {
            sqlx::query!("DELETE FROM devices WHERE device_id = $1", device_id.as_uuid())
                .execute(connection)
                .await?;
            Ok(())
        }

        /// §4.H "90-day inactivity" device removal sweep.
        pub(crate) async fn delete_inactive(
            connection: impl PgExecutor<'_>,
            older_than: DateTime<Utc>,
        ) -> Result<u64, StorageError> {
            let result = sqlx::query!("DELETE FROM devices WHERE last_seen_at < $1", older_than)
                .execute(connection)
                .await?;
            Ok(result.rows_affected())
        }
    }
}

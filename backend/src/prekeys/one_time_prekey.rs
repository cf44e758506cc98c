// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The `one_time_prekeys` pool (§3.1 One-Time Pre-Key, §3.3 "Pre-key claim
//! atomicity"). The claim is a single `DELETE ... RETURNING` statement
//! under `FOR UPDATE SKIP LOCKED` so that two concurrent claimers for the
//! same device never observe the same row (§8 property 2).

use relay_common::crypto::agreement::AgreementKeyBytes;
use relay_common::identifiers::DeviceId;
use sqlx::PgExecutor;

use crate::errors::StorageError;

#[derive(Debug, Clone)]
pub struct OneTimePreKey {
    pub device_id: DeviceId,
    pub key_id: i32,
    pub pubkey: AgreementKeyBytes,
}

pub(crate) mod persistence {
    use super::*;

    impl OneTimePreKey {
        pub(crate) async fn store_batch(
            connection: impl PgExecutor<'_>,
            device_id: DeviceId,
            keys: &[(i32, AgreementKeyBytes)],
        ) -> Result<(), StorageError> {
            if keys.is_empty() {
                return Ok(());
            }
            let mut query_string =
                String::from("INSERT INTO one_time_prekeys (device_id, key_id, pubkey) VALUES");
            let mut args = sqlx::postgres::PgArguments::default();
            use sqlx::Arguments;
            for (i, (key_id, pubkey)) in keys.iter().enumerate() {
                args.add(device_id.as_uuid())?;
                args.add(*key_id)?;
                args.add(pubkey.as_bytes().as_slice())?;
                if i > 0 {
                    query_string.push(',');
                }
                query_string.push_str(&format!(" (${}, ${}, ${})", i * 3 + 1, i * 3 + 2, i * 3 + 3));
            }
            query_string.push_str(" ON CONFLICT (device_id, key_id) DO NOTHING");
            sqlx::query_with(&query_string, args).execute(connection).await?;
            Ok(())
        }

        /// Atomically removes and returns one pool row for `device_id`
        /// (§3.3, §4.B algorithm step 2). `None` means the pool is empty —
        /// a valid, non-error outcome (§4.B edge cases).
        pub(crate) async fn claim_one(
            connection: impl PgExecutor<'_>,
            device_id: DeviceId,
        ) -> Result<Option<OneTimePreKey>, StorageError> {
            let row = sqlx::query!(
                r#"WITH candidate AS (
                    SELECT key_id FROM one_time_prekeys
                    WHERE device_id = $1
                    ORDER BY key_id
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
                )
                DELETE FROM one_time_prekeys
                WHERE device_id = $1 AND key_id = (SELECT key_id FROM candidate)
                RETURNING device_id, key_id, pubkey"#,
                device_id.as_uuid(),
            )
            .fetch_optional(connection)
            .await?;
            let Some(row) = row else {
                return Ok(None);
            };
            Ok(Some(OneTimePreKey {
                device_id: DeviceId::from_uuid(row.device_id),
                key_id: row.key_id,
                pubkey: AgreementKeyBytes::from_bytes(row.pubkey.try_into().map_err(|_| {
                    StorageError::Malformed("one_time_prekeys.pubkey is not 32 bytes")
                })?),
            }))
        }

        pub(crate) async fn count_remaining(
            connection: impl PgExecutor<'_>,
            device_id: DeviceId,
        ) -> Result<i64, StorageError> {
            let count = sqlx::query_scalar!(
                "SELECT COUNT(*) FROM one_time_prekeys WHERE device_id = $1",
                device_id.as_uuid(),
            )
            .fetch_one(connection)
            .await?;
            Ok(count.unwrap_or(0))
        }

        /// §4.H "prompt pre-key replenishment": devices below the target
        /// pool size, used to decide who gets a `pre_key_low` notification.
        pub(crate) async fn load_device_ids_below(
            connection: impl PgExecutor<'_>,
            threshold: i64,
        ) -> Result<Vec<DeviceId>, StorageError> {
            let rows = sqlx::query!(
                r#"SELECT device_id, COUNT(*) as count FROM one_time_prekeys
                GROUP BY device_id HAVING COUNT(*) < $1"#,
                threshold,
            )
            .fetch_all(connection)
            .await?;
            Ok(rows.into_iter().map(|row| DeviceId::from_uuid(row.device_id)).collect())
        }
    }
}

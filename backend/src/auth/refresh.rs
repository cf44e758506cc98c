// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Refresh-token persistence and the `revoked_token_families` table (§3.1
//! Session Token, §4.A `refresh`, §8 "refresh-token theft"). A family is
//! created at login and shared by the access token and every refresh token
//! derived from it by rotation; revoking the family invalidates all of
//! them in one write.

use chrono::{DateTime, Utc};
use relay_common::identifiers::{DeviceId, UserId};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::errors::StorageError;

/// One row per refresh token ever minted. `used_at` is set the moment the
/// token is redeemed (§4.A "single-use... rotates on every refresh"); the
/// row itself is kept so a later presentation of the same hash can be told
/// apart from a hash that never existed at all (§8 "refresh-token theft").
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub token_hash: Vec<u8>,
    pub family_id: Uuid,
    pub user_id: UserId,
    pub device_id: Option<DeviceId>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

pub const REFRESH_TOKEN_LIFETIME: chrono::Duration = chrono::Duration::days(30);

pub(crate) mod persistence {
    use super::*;

    impl RefreshTokenRecord {
        pub(crate) async fn store(&self, connection: impl PgExecutor<'_>) -> Result<(), StorageError> {
            sqlx::query!(
                r#"INSERT INTO refresh_tokens (token_hash, family_id, user_id, device_id, expires_at, used_at)
                VALUES ($1, $2, $3, $4, $5, $6)"#,
                self.token_hash,
                self.family_id,
                self.user_id.as_uuid(),
                self.device_id.map(|d| d.as_uuid()),
                self.expires_at,
                self.used_at,
            )
            .execute(connection)
            .await?;
            Ok(())
        }

        pub(crate) async fn load_by_hash(
            connection: impl PgExecutor<'_>,
            token_hash: &[u8],
        ) -> Result<Option<RefreshTokenRecord>, StorageError> {
            let row = sqlx::query!(
                r#"SELECT token_hash, family_id, user_id, device_id, expires_at, used_at
                FROM refresh_tokens WHERE token_hash = $1"#,
                token_hash,
            )
            .fetch_optional(connection)
            .await?;
            Ok(row.map(|row| RefreshTokenRecord {
                token_hash: row.token_hash,
                family_id: row.family_id,
                user_id: UserId::from_uuid(row.user_id),
                device_id: row.device_id.map(DeviceId::from_uuid),
                expires_at: row.expires_at,
                used_at: row.used_at,
            }))
        }

        /// Marks the presented token's row used instead of deleting it, so a
        /// later replay of the same hash is distinguishable from a hash that
        /// never existed (§4.A, §8 "refresh-token theft"). Guarded on
        /// `used_at IS NULL` so two concurrent redemptions of the same token
        /// can't both believe they were first.
        pub(crate) async fn mark_used_by_hash(
            connection: impl PgExecutor<'_>,
            token_hash: &[u8],
        ) -> Result<bool, StorageError> {
            let result = sqlx::query!(
                "UPDATE refresh_tokens SET used_at = now() WHERE token_hash = $1 AND used_at IS NULL",
                token_hash,
            )
            .execute(connection)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        pub(crate) async fn delete_family(
            connection: impl PgExecutor<'_>,
            family_id: Uuid,
        ) -> Result<(), StorageError> {
            sqlx::query!("DELETE FROM refresh_tokens WHERE family_id = $1", family_id)
                .execute(connection)
                .await?;
            Ok(())
        }
    }

    /// Records that `family_id` is revoked (§6.3 `revoked_token_families`).
    /// Checked by `validate` on every access-token verification.
    pub(crate) async fn revoke_family(
        connection: impl PgExecutor<'_>,
        family_id: Uuid,
    ) -> Result<(), StorageError> {
        sqlx::query!(
            "INSERT INTO revoked_token_families (family_id, revoked_at) VALUES ($1, now())
            ON CONFLICT (family_id) DO NOTHING",
            family_id,
        )
        .execute(connection)
        .await?;
        Ok(())
    }

    pub(crate) async fn is_family_revoked(
        connection: impl PgExecutor<'_>,
        family_id: Uuid,
    ) -> Result<bool, StorageError> {
        let row = sqlx::query!(
            "SELECT 1 as present FROM revoked_token_families WHERE family_id = $1",
            family_id,
        )
        .fetch_optional(connection)
        .await?;
        Ok(row.is_some())
    }
}

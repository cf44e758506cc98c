// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The `users` table (§3.1 User, §6.3). Never hard-deleted: `is_active`
//! soft-deletes a user while keeping the identity key around for historical
//! signature verification (§3.1 "identity key preserved").

use chrono::{DateTime, Utc};
use relay_common::crypto::signatures::VerifyingKeyBytes;
use relay_common::identifiers::{PhoneNumber, UserId};
use sqlx::PgExecutor;

use crate::errors::StorageError;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: UserId,
    pub phone: PhoneNumber,
    pub identity_pubkey: VerifyingKeyBytes,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl UserRecord {
    pub fn new(phone: PhoneNumber, identity_pubkey: VerifyingKeyBytes) -> Self {
        Self {
            user_id: UserId::random(),
            phone,
            identity_pubkey,
            display_name: None,
            created_at: Utc::now(),
            is_active: true,
        }
    }

    fn identity_key_from_column(bytes: Vec<u8>) -> Result<VerifyingKeyBytes, StorageError> {
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| StorageError::Malformed("users.identity_pubkey is not 32 bytes"))?;
        Ok(VerifyingKeyBytes::from_bytes(array))
    }
}

pub(crate) mod persistence {
    use super::*;

    impl UserRecord {
        pub(crate) async fn store(&self, connection: impl PgExecutor<'_>) -> Result<(), StorageError> {
            sqlx::query!(
                r#"INSERT INTO users (user_id, phone, identity_pubkey, display_name, created_at, is_active)
                VALUES ($1, $2, $3, $4, $5, $6)"#,
                self.user_id.as_uuid(),
                self.phone.as_str(),
                self.identity_pubkey.as_bytes().as_slice(),
                self.display_name,
                self.created_at,
                self.is_active,
            )
            .execute(connection)
            .await?;
            Ok(())
        }

        pub(crate) async fn load_by_phone(
            connection: impl PgExecutor<'_>,
            phone: &PhoneNumber,
        ) -> Result<Option<UserRecord>, StorageError> {
            let row = sqlx::query!(
                r#"SELECT user_id, phone, identity_pubkey, display_name, created_at, is_active
                FROM users WHERE phone = $1"#,
                phone.as_str(),
            )
            .fetch_optional(connection)
            .await?;
            let Some(row) = row else {
                return Ok(None);
            };
            Ok(Some(UserRecord {
                user_id: UserId::from_uuid(row.user_id),
                phone: phone.clone(),
                identity_pubkey: UserRecord::identity_key_from_column(row.identity_pubkey)?,
                display_name: row.display_name,
                created_at: row.created_at,
                is_active: row.is_active,
            }))
        }

        /// Installs the real identity key in place of the placeholder set at
        /// verification time (§4.A, §4.B `/keys/publish` first call).
        pub(crate) async fn set_identity_pubkey(
            connection: impl PgExecutor<'_>,
            user_id: UserId,
            identity_pubkey: VerifyingKeyBytes,
        ) -> Result<(), StorageError> {
            sqlx::query!(
                "UPDATE users SET identity_pubkey = $1 WHERE user_id = $2",
                identity_pubkey.as_bytes().as_slice(),
                user_id.as_uuid(),
            )
            .execute(connection)
            .await?;
            Ok(())
        }

        pub(crate) async fn load_by_id(
            connection: impl PgExecutor<'_>,
            user_id: UserId,
        ) -> Result<Option<UserRecord>, StorageError> {
            let row = sqlx::query!(
                r#"SELECT user_id, phone, identity_pubkey, display_name, created_at, is_active
                FROM users WHERE user_id = $1"#,
                user_id.as_uuid(),
            )
            .fetch_optional(connection)
            .await?;
            let Some(row) = row else {
                return Ok(None);
            };
            let phone = relay_common::identifiers::PhoneNumber::parse(&row.phone)
                .map_err(|_| StorageError::Malformed("users.phone is not E.164"))?;
            Ok(Some(UserRecord {
                user_id: UserId::from_uuid(row.user_id),
                phone,
                identity_pubkey: UserRecord::identity_key_from_column(row.identity_pubkey)?,
                display_name: row.display_name,
                created_at: row.created_at,
                is_active: row.is_active,
            }))
        }
    }
}

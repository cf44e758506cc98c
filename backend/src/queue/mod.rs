// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The Offline Queue (§4.E): a durable per-device FIFO of undelivered
//! envelopes, persisted in the `offline_envelopes` table (§6.3).

pub mod errors;

use chrono::{Duration, Utc};
use futures_util::TryStreamExt;
use relay_common::identifiers::{DeviceId, EnvelopeId, UserId};
use relay_common::messages::{CiphertextType, Envelope};
use sqlx::PgPool;
use tracing::instrument;

use self::errors::QueueError;

/// §4.G "signaling envelopes are not spooled... beyond a 60-second TTL".
pub const SIGNALING_TTL: Duration = Duration::seconds(60);
/// §4.E "default TTL (default 30 days)".
pub const DEFAULT_TTL: Duration = Duration::days(30);

fn ttl_for(ciphertext_type: CiphertextType) -> Duration {
    if ciphertext_type.is_signaling() {
        SIGNALING_TTL
    } else {
        DEFAULT_TTL
    }
}

#[derive(Clone)]
pub struct OfflineQueue {
    pool: PgPool,
}

impl OfflineQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `append(target_device, envelope)` (§4.E). Idempotent on
    /// `(target_device_id, envelope_id)` — a retried ingest of the same
    /// envelope-id is a no-op (§4.D deduplication).
    #[instrument(skip(self, envelope), err)]
    pub async fn append(&self, target_device: DeviceId, envelope: &Envelope) -> Result<(), QueueError> {
        let expires_at = envelope
            .expires_at
            .unwrap_or_else(|| envelope.created_at + ttl_for(envelope.ciphertext_type));
        sqlx::query!(
            r#"INSERT INTO offline_envelopes
                (target_device_id, envelope_id, sender_user_id, sender_device_id,
                 ciphertext, ciphertext_type, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (target_device_id, envelope_id) DO NOTHING"#,
            target_device.as_uuid(),
            envelope.envelope_id.as_uuid(),
            envelope.sender_user_id.as_uuid(),
            envelope.sender_device_id.as_uuid(),
            envelope.ciphertext,
            envelope.ciphertext_type as CiphertextType,
            envelope.created_at,
            expires_at,
        )
        .execute(&self.pool)
        .await
        .map_err(crate::errors::StorageError::from)?;
        Ok(())
    }

    /// `drain_on_connect(target_device)` (§4.E): an ordered stream,
    /// ascending by server timestamp, of every envelope still awaiting
    /// acknowledgement for `target_device`.
    pub fn drain_on_connect(
        &self,
        target_device: DeviceId,
    ) -> impl futures_util::Stream<Item = Result<Envelope, QueueError>> + '_ {
        sqlx::query!(
            r#"SELECT oe.envelope_id, oe.sender_user_id, oe.sender_device_id, oe.ciphertext,
                oe.ciphertext_type as "ciphertext_type: CiphertextType", oe.created_at, oe.expires_at,
                d.user_id as target_user_id
            FROM offline_envelopes oe
            JOIN devices d ON d.device_id = oe.target_device_id
            WHERE oe.target_device_id = $1
            ORDER BY oe.created_at ASC"#,
            target_device.as_uuid(),
        )
        .fetch(&self.pool)
        .map_ok(move |row| Envelope {
            envelope_id: EnvelopeId::from_uuid(row.envelope_id),
            sender_user_id: UserId::from_uuid(row.sender_user_id),
            sender_device_id: DeviceId::from_uuid(row.sender_device_id),
            target_user_id: UserId::from_uuid(row.target_user_id),
            target_device_id: target_device,
            ciphertext_type: row.ciphertext_type,
            ciphertext: row.ciphertext,
            created_at: row.created_at,
            expires_at: Some(row.expires_at),
        })
        .map_err(|e| QueueError::Storage(crate::errors::StorageError::from(e)))
    }

    /// `ack(target_device, envelope_id)` (§4.E, §8 property 5 idempotent).
    #[instrument(skip(self), err)]
    pub async fn ack(&self, target_device: DeviceId, envelope_id: EnvelopeId) -> Result<(), QueueError> {
        sqlx::query!(
            "DELETE FROM offline_envelopes WHERE target_device_id = $1 AND envelope_id = $2",
            target_device.as_uuid(),
            envelope_id.as_uuid(),
        )
        .execute(&self.pool)
        .await
        .map_err(crate::errors::StorageError::from)?;
        Ok(())
    }

    pub async fn is_empty_for(&self, target_device: DeviceId) -> Result<bool, QueueError> {
        let count = sqlx::query_scalar!(
            "SELECT COUNT(*) FROM offline_envelopes WHERE target_device_id = $1",
            target_device.as_uuid(),
        )
        .fetch_one(&self.pool)
        .await
        .map_err(crate::errors::StorageError::from)?;
        Ok(count.unwrap_or(0) == 0)
    }

    /// Looks up the original sender of a still-queued envelope, so a
    /// `receipt` frame can be routed back to them (§4.C "forwarded as a
    /// routed envelope to the original sender"). Returns `None` once the
    /// envelope has already been acknowledged and its row cleared — a
    /// receipt racing an `ack` is a no-op rather than an error.
    #[instrument(skip(self), err)]
    pub async fn lookup_sender(
        &self,
        target_device: DeviceId,
        envelope_id: EnvelopeId,
    ) -> Result<Option<(UserId, DeviceId)>, QueueError> {
        let row = sqlx::query!(
            "SELECT sender_user_id, sender_device_id FROM offline_envelopes
            WHERE target_device_id = $1 AND envelope_id = $2",
            target_device.as_uuid(),
            envelope_id.as_uuid(),
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::errors::StorageError::from)?;
        Ok(row.map(|row| {
            (
                UserId::from_uuid(row.sender_user_id),
                DeviceId::from_uuid(row.sender_device_id),
            )
        }))
    }

    /// §4.H "expire offline envelopes" sweep.
    #[instrument(skip(self), err)]
    pub async fn expire(&self) -> Result<u64, QueueError> {
        let result = sqlx::query!("DELETE FROM offline_envelopes WHERE expires_at < now()")
            .execute(&self.pool)
            .await
            .map_err(crate::errors::StorageError::from)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use relay_common::crypto::signatures::SigningKeyPair;
    use relay_common::identifiers::{DeviceId, PhoneNumber, Platform};

    use super::*;
    use crate::auth::device_record::DeviceRecord;
    use crate::auth::user_record::UserRecord;

    /// Seeds a user and one of their devices so `target_device_id` satisfies
    /// `offline_envelopes`'s foreign key into `devices`.
    async fn seed_device(pool: &PgPool, phone: &str) -> anyhow::Result<(UserId, DeviceId)> {
        let user = UserRecord::new(PhoneNumber::parse(phone)?, SigningKeyPair::generate().verifying_key());
        user.store(pool).await?;
        let device = DeviceRecord::new(user.user_id, SigningKeyPair::generate().verifying_key(), Platform::Ios);
        device.store(pool).await?;
        Ok((user.user_id, device.device_id))
    }

    fn sample_envelope(target_user_id: UserId, target_device_id: DeviceId) -> Envelope {
        Envelope {
            envelope_id: EnvelopeId::random(),
            sender_user_id: UserId::random(),
            sender_device_id: DeviceId::random(),
            target_user_id,
            target_device_id,
            ciphertext_type: CiphertextType::NormalMessage,
            ciphertext: vec![1, 2, 3],
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[sqlx::test]
    async fn append_then_drain_returns_the_envelope(pool: PgPool) -> anyhow::Result<()> {
        let (user_id, target) = seed_device(&pool, "+15550001111").await?;
        let queue = OfflineQueue::new(pool);
        let envelope = sample_envelope(user_id, target);
        queue.append(target, &envelope).await?;

        let drained: Vec<_> = queue.drain_on_connect(target).collect().await;
        assert_eq!(drained.len(), 1);
        let drained = drained[0].as_ref().unwrap();
        assert_eq!(drained.envelope_id, envelope.envelope_id);
        assert_eq!(drained.target_user_id, user_id);
        Ok(())
    }

    #[sqlx::test]
    async fn append_is_idempotent_on_envelope_id(pool: PgPool) -> anyhow::Result<()> {
        let (user_id, target) = seed_device(&pool, "+15550001112").await?;
        let queue = OfflineQueue::new(pool);
        let envelope = sample_envelope(user_id, target);
        queue.append(target, &envelope).await?;
        queue.append(target, &envelope).await?;

        let drained: Vec<_> = queue.drain_on_connect(target).collect().await;
        assert_eq!(drained.len(), 1);
        Ok(())
    }

    #[sqlx::test]
    async fn ack_removes_the_envelope(pool: PgPool) -> anyhow::Result<()> {
        let (user_id, target) = seed_device(&pool, "+15550001113").await?;
        let queue = OfflineQueue::new(pool);
        let envelope = sample_envelope(user_id, target);
        queue.append(target, &envelope).await?;
        queue.ack(target, envelope.envelope_id).await?;

        assert!(queue.is_empty_for(target).await?);
        Ok(())
    }

    #[sqlx::test]
    async fn ack_of_unknown_envelope_is_a_no_op(pool: PgPool) -> anyhow::Result<()> {
        let (_, target) = seed_device(&pool, "+15550001114").await?;
        let queue = OfflineQueue::new(pool);
        queue.ack(target, EnvelopeId::random()).await?;
        Ok(())
    }

    #[sqlx::test]
    async fn lookup_sender_finds_the_original_sender_of_a_queued_envelope(pool: PgPool) -> anyhow::Result<()> {
        let (user_id, target) = seed_device(&pool, "+15550001115").await?;
        let queue = OfflineQueue::new(pool);
        let envelope = sample_envelope(user_id, target);
        queue.append(target, &envelope).await?;

        let sender = queue.lookup_sender(target, envelope.envelope_id).await?;
        assert_eq!(sender, Some((envelope.sender_user_id, envelope.sender_device_id)));
        Ok(())
    }

    #[sqlx::test]
    async fn lookup_sender_is_none_once_acknowledged(pool: PgPool) -> anyhow::Result<()> {
        let (user_id, target) = seed_device(&pool, "+15550001116").await?;
        let queue = OfflineQueue::new(pool);
        let envelope = sample_envelope(user_id, target);
        queue.append(target, &envelope).await?;
        queue.ack(target, envelope.envelope_id).await?;

        assert_eq!(queue.lookup_sender(target, envelope.envelope_id).await?, None);
        Ok(())
    }
}

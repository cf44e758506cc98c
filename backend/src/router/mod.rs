// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The Fan-Out Router (§4.D): resolves an inbound envelope to one or more
//! target devices, delivers directly to an online device's channel, and
//! falls back to the offline queue plus a push wake-up otherwise.

pub mod errors;

use std::sync::Arc;

use relay_common::MAX_CIPHERTEXT_BYTES;
use relay_common::identifiers::{DeviceId, EnvelopeId, UserId};
use relay_common::messages::{CiphertextType, Envelope};
use sqlx::PgPool;
use tracing::{instrument, warn};

use crate::auth::device_record::DeviceRecord;
use crate::connection_directory::ConnectionDirectory;
use crate::push::{PushDispatcher, PushPriority, errors::PushError};
use crate::queue::OfflineQueue;

use self::errors::RouterError;

pub struct EnvelopeRouter {
    pool: PgPool,
    directory: Arc<dyn ConnectionDirectory>,
    queue: OfflineQueue,
    push: Arc<PushDispatcher>,
}

impl EnvelopeRouter {
    pub fn new(
        pool: PgPool,
        directory: Arc<dyn ConnectionDirectory>,
        queue: OfflineQueue,
        push: Arc<PushDispatcher>,
    ) -> Self {
        Self {
            pool,
            directory,
            queue,
            push,
        }
    }

    /// `ingest` (§4.D): validates the ciphertext, resolves the target
    /// device(s), and delivers to each — directly if online, via the
    /// offline queue and a push wake-up otherwise.
    #[instrument(skip(self, ciphertext), fields(envelope_id = %envelope_id), err)]
    pub async fn ingest(
        &self,
        envelope_id: EnvelopeId,
        sender_user_id: UserId,
        sender_device_id: DeviceId,
        target_user_id: UserId,
        target_device: Option<DeviceId>,
        ciphertext_type: CiphertextType,
        ciphertext: Vec<u8>,
    ) -> Result<(), RouterError> {
        if ciphertext.is_empty() {
            return Err(RouterError::Empty);
        }
        if ciphertext.len() > MAX_CIPHERTEXT_BYTES {
            return Err(RouterError::TooLarge);
        }

        let targets = self
            .resolve_targets(sender_user_id, sender_device_id, target_user_id, target_device)
            .await?;

        for target_device_id in targets {
            let envelope = Envelope {
                envelope_id,
                sender_user_id,
                sender_device_id,
                target_user_id,
                target_device_id,
                ciphertext_type,
                ciphertext: ciphertext.clone(),
                created_at: relay_common::time::now(),
                expires_at: None,
            };
            self.deliver_to_device(target_device_id, envelope).await?;
        }
        Ok(())
    }

    /// A bare device-id names exactly that device. Absence of one is only
    /// meaningful for a self-send: it fans out to every other active device
    /// of the sender's own user (§4.D "multi-device sync").
    async fn resolve_targets(
        &self,
        sender_user_id: UserId,
        sender_device_id: DeviceId,
        target_user_id: UserId,
        target_device: Option<DeviceId>,
    ) -> Result<Vec<DeviceId>, RouterError> {
        match target_device {
            Some(device_id) => {
                let device = DeviceRecord::load(&self.pool, device_id)
                    .await
                    .map_err(RouterError::Storage)?
                    .ok_or(RouterError::TargetUnknown)?;
                if device.user_id != target_user_id {
                    return Err(RouterError::TargetUnknown);
                }
                Ok(vec![device_id])
            }
            None => {
                if sender_user_id != target_user_id {
                    return Err(RouterError::TargetUnknown);
                }
                let devices = DeviceRecord::load_for_user(&self.pool, target_user_id)
                    .await
                    .map_err(RouterError::Storage)?;
                Ok(devices
                    .into_iter()
                    .map(|device| device.device_id)
                    .filter(|device_id| *device_id != sender_device_id)
                    .collect())
            }
        }
    }

    /// Persists to the durable offline queue unconditionally, then attempts
    /// a direct publish to an online device's channel (§8 universal
    /// invariant 1: "either every target device's offline queue contains it
    /// or the envelope is acknowledged"). `publish` over a bounded broadcast
    /// channel returns `Ok` even when it evicts an unread message to make
    /// room, so a live hand-off is never treated as a substitute for the
    /// durable copy — only `ack` (on delivery) clears the queued row.
    async fn deliver_to_device(&self, target_device_id: DeviceId, envelope: Envelope) -> Result<(), RouterError> {
        self.queue.append(target_device_id, &envelope).await?;

        let online = matches!(self.directory.lookup(target_device_id).await, Ok(Some(_)));
        if online && self.directory.publish(target_device_id, envelope.clone()).await.is_ok() {
            return Ok(());
        }

        let priority = if envelope.ciphertext_type.is_signaling() {
            PushPriority::VoipHighPriority
        } else {
            PushPriority::Normal
        };
        match self.push.dispatch(target_device_id, priority).await {
            Ok(()) | Err(PushError::NoToken) => {}
            Err(err) => warn!(%target_device_id, %err, "push wakeup failed after spooling envelope"),
        }
        Ok(())
    }
}

// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The shared KV store abstraction (§5 "Shared-resource policy", §6.3): the
//! only medium replicas use to discover which of them owns a given device's
//! socket and to fan out envelopes to it. Two implementations are provided,
//! mirroring the teacher's `Notifier`/`WebsocketNotifier` split between a
//! production transport and an in-process one used by tests and
//! single-replica deployments:
//!
//! - [`RedisConnectionDirectory`] — production, grounded on the `redis`
//!   crate usage in `proerror77-Nova/backend/libs/redis-utils`.
//! - [`InMemoryConnectionDirectory`] — a single-process stand-in used by
//!   `test_harness` and local/dev runs with one replica.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use displaydoc::Display;
use futures_util::StreamExt;
use redis::AsyncCommands;
use relay_common::{identifiers::DeviceId, messages::Envelope};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{instrument, warn};

/// TTL on a connection record; refreshed by the 30s heartbeat (§3.1).
pub const CONNECTION_RECORD_TTL: Duration = Duration::from_secs(90);

#[derive(Debug, Error, Display)]
pub enum DirectoryError {
    /// underlying store failure: {0}
    Backend(String),
}

/// Identifies which replica currently owns a device's socket (§3.1, §6.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub replica_id: String,
    pub channel_name: String,
}

impl ConnectionRecord {
    pub fn channel_for(device_id: DeviceId) -> String {
        format!("device:{device_id}")
    }
}

/// A live subscription to a device's fan-out channel. The connection manager
/// holds one of these for the lifetime of an `Active` socket.
pub struct Subscription {
    receiver: broadcast::Receiver<Envelope>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                // A slow subscriber missed messages; the envelopes it missed
                // are still safe because the router only publishes to an
                // online device after confirming a connection record exists,
                // and a disconnect would have removed that record. A lagged
                // receiver just means we resume from the next one.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Cross-replica coordination: connection-record lookup and per-device
/// pub/sub fan-out (§5, §6.3).
#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    async fn register(
        &self,
        device_id: DeviceId,
        replica_id: &str,
    ) -> Result<(), DirectoryError>;

    /// Refresh the TTL without changing the stored value (§3.1 heartbeat).
    async fn heartbeat(&self, device_id: DeviceId) -> Result<(), DirectoryError>;

    async fn lookup(&self, device_id: DeviceId) -> Result<Option<ConnectionRecord>, DirectoryError>;

    async fn remove(&self, device_id: DeviceId) -> Result<(), DirectoryError>;

    /// Fire-and-forget publish to the device's channel (§4.D step 2b).
    /// Returns without waiting for the subscriber to process the message;
    /// per-channel ordering is guaranteed by the pub/sub transport being
    /// FIFO within a channel.
    async fn publish(&self, device_id: DeviceId, envelope: Envelope) -> Result<(), DirectoryError>;

    async fn subscribe(&self, device_id: DeviceId) -> Result<Subscription, DirectoryError>;

    /// Best-effort removal of connection records whose TTL lapsed without a
    /// heartbeat (§4.H "reap stale connection records"). Implementations
    /// backed by a store with native TTL (Redis) can no-op here since
    /// expiry already happened; the in-memory implementation needs this.
    async fn reap_expired(&self) -> Result<usize, DirectoryError> {
        Ok(0)
    }
}

/// Production implementation over Redis: `conn:{device_id}` keys with TTL,
/// and native Redis pub/sub on `device:{device_id}` channels.
pub struct RedisConnectionDirectory {
    commands: redis::aio::ConnectionManager,
    client: redis::Client,
    /// In-process fan-out for this replica's own subscribers; a background
    /// task re-publishes everything this replica receives from Redis onto
    /// per-device broadcast channels so `subscribe` can hand out a simple
    /// `Subscription` without each call opening its own Redis connection.
    local_channels: Arc<DashMap<DeviceId, broadcast::Sender<Envelope>>>,
}

impl RedisConnectionDirectory {
    pub async fn connect(redis_url: &str) -> Result<Self, DirectoryError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| DirectoryError::Backend(e.to_string()))?;
        let commands = redis::aio::ConnectionManager::new(client.clone())
            .await
            .map_err(|e| DirectoryError::Backend(e.to_string()))?;
        Ok(Self {
            commands,
            client,
            local_channels: Arc::new(DashMap::new()),
        })
    }

    fn conn_key(device_id: DeviceId) -> String {
        format!("conn:{device_id}")
    }
}

#[async_trait]
impl ConnectionDirectory for RedisConnectionDirectory {
    #[instrument(level = "debug", skip(self), err)]
    async fn register(&self, device_id: DeviceId, replica_id: &str) -> Result<(), DirectoryError> {
        let record = ConnectionRecord {
            replica_id: replica_id.to_string(),
            channel_name: ConnectionRecord::channel_for(device_id),
        };
        let value = format!("{}|{}", record.replica_id, record.channel_name);
        let mut conn = self.commands.clone();
        conn.set_ex::<_, _, ()>(
            Self::conn_key(device_id),
            value,
            CONNECTION_RECORD_TTL.as_secs(),
        )
        .await
        .map_err(|e| DirectoryError::Backend(e.to_string()))
    }

    async fn heartbeat(&self, device_id: DeviceId) -> Result<(), DirectoryError> {
        let mut conn = self.commands.clone();
        conn.expire::<_, ()>(Self::conn_key(device_id), CONNECTION_RECORD_TTL.as_secs() as i64)
            .await
            .map_err(|e| DirectoryError::Backend(e.to_string()))
    }

    async fn lookup(&self, device_id: DeviceId) -> Result<Option<ConnectionRecord>, DirectoryError> {
        let mut conn = self.commands.clone();
        let value: Option<String> = conn
            .get(Self::conn_key(device_id))
            .await
            .map_err(|e| DirectoryError::Backend(e.to_string()))?;
        Ok(value.and_then(|v| {
            let (replica_id, channel_name) = v.split_once('|')?;
            Some(ConnectionRecord {
                replica_id: replica_id.to_string(),
                channel_name: channel_name.to_string(),
            })
        }))
    }

    async fn remove(&self, device_id: DeviceId) -> Result<(), DirectoryError> {
        let mut conn = self.commands.clone();
        conn.del::<_, ()>(Self::conn_key(device_id))
            .await
            .map_err(|e| DirectoryError::Backend(e.to_string()))
    }

    async fn publish(&self, device_id: DeviceId, envelope: Envelope) -> Result<(), DirectoryError> {
        let payload =
            serde_json::to_string(&envelope).map_err(|e| DirectoryError::Backend(e.to_string()))?;
        let mut conn = self.commands.clone();
        conn.publish::<_, _, ()>(ConnectionRecord::channel_for(device_id), payload)
            .await
            .map_err(|e| DirectoryError::Backend(e.to_string()))
    }

    async fn subscribe(&self, device_id: DeviceId) -> Result<Subscription, DirectoryError> {
        if let Some(sender) = self.local_channels.get(&device_id) {
            return Ok(Subscription {
                receiver: sender.subscribe(),
            });
        }
        let (sender, receiver) = broadcast::channel(256);
        self.local_channels.insert(device_id, sender.clone());

        let client = self.client.clone();
        let channel = ConnectionRecord::channel_for(device_id);
        let channels = self.local_channels.clone();
        tokio::spawn(async move {
            let Ok(mut pubsub) = client.get_async_pubsub().await else {
                warn!(%device_id, "failed to open redis pubsub connection");
                return;
            };
            if pubsub.subscribe(&channel).await.is_err() {
                warn!(%device_id, %channel, "failed to subscribe to device channel");
                return;
            }
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let Ok(payload): Result<String, _> = msg.get_payload() else {
                    continue;
                };
                if let Ok(envelope) = serde_json::from_str::<Envelope>(&payload) {
                    let _ = sender.send(envelope);
                } else {
                    warn!(%device_id, "dropped malformed envelope payload from pubsub");
                }
            }
            channels.remove(&device_id);
        });

        Ok(Subscription { receiver })
    }
}

/// Single-process stand-in used by `test_harness` and single-replica
/// deployments. Connection records live in a `DashMap` with an explicit
/// expiry timestamp instead of relying on Redis's native TTL.
#[derive(Default)]
pub struct InMemoryConnectionDirectory {
    records: DashMap<DeviceId, (ConnectionRecord, std::time::Instant)>,
    channels: DashMap<DeviceId, broadcast::Sender<Envelope>>,
}

impl InMemoryConnectionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, device_id: DeviceId) -> broadcast::Sender<Envelope> {
        self.channels
            .entry(device_id)
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

#[async_trait]
impl ConnectionDirectory for InMemoryConnectionDirectory {
    async fn register(&self, device_id: DeviceId, replica_id: &str) -> Result<(), DirectoryError> {
        let record = ConnectionRecord {
            replica_id: replica_id.to_string(),
            channel_name: ConnectionRecord::channel_for(device_id),
        };
        self.records.insert(
            device_id,
            (record, std::time::Instant::now() + CONNECTION_RECORD_TTL),
        );
        Ok(())
    }

    async fn heartbeat(&self, device_id: DeviceId) -> Result<(), DirectoryError> {
        if let Some(mut entry) = self.records.get_mut(&device_id) {
            entry.1 = std::time::Instant::now() + CONNECTION_RECORD_TTL;
        }
        Ok(())
    }

    async fn lookup(&self, device_id: DeviceId) -> Result<Option<ConnectionRecord>, DirectoryError> {
        Ok(self.records.get(&device_id).and_then(|entry| {
            if entry.1 > std::time::Instant::now() {
                Some(entry.0.clone())
            } else {
                None
            }
        }))
    }

    async fn remove(&self, device_id: DeviceId) -> Result<(), DirectoryError> {
        self.records.remove(&device_id);
        Ok(())
    }

    async fn publish(&self, device_id: DeviceId, envelope: Envelope) -> Result<(), DirectoryError> {
        // Fire-and-forget: no subscriber is not an error (§4.D, §9).
        let _ = self.channel(device_id).send(envelope);
        Ok(())
    }

    async fn subscribe(&self, device_id: DeviceId) -> Result<Subscription, DirectoryError> {
        Ok(Subscription {
            receiver: self.channel(device_id).subscribe(),
        })
    }

    async fn reap_expired(&self) -> Result<usize, DirectoryError> {
        let now = std::time::Instant::now();
        let expired: Vec<DeviceId> = self
            .records
            .iter()
            .filter(|entry| entry.1 <= now)
            .map(|entry| *entry.key())
            .collect();
        for device_id in &expired {
            self.records.remove(device_id);
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_common::identifiers::UserId;
    use relay_common::messages::CiphertextType;

    fn sample_envelope(target: DeviceId) -> Envelope {
        Envelope {
            envelope_id: relay_common::identifiers::EnvelopeId::random(),
            sender_user_id: UserId::random(),
            sender_device_id: DeviceId::random(),
            target_user_id: UserId::random(),
            target_device_id: target,
            ciphertext_type: CiphertextType::NormalMessage,
            ciphertext: vec![0xDE, 0xAD],
            created_at: relay_common::time::now(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn register_then_lookup_finds_record() {
        let directory = InMemoryConnectionDirectory::new();
        let device = DeviceId::random();
        directory.register(device, "replica-a").await.unwrap();
        let record = directory.lookup(device).await.unwrap();
        assert_eq!(record.unwrap().replica_id, "replica-a");
    }

    #[tokio::test]
    async fn lookup_for_unknown_device_is_none() {
        let directory = InMemoryConnectionDirectory::new();
        assert!(directory.lookup(DeviceId::random()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn publish_is_received_by_subscriber() {
        let directory = InMemoryConnectionDirectory::new();
        let device = DeviceId::random();
        let mut sub = directory.subscribe(device).await.unwrap();
        directory
            .publish(device, sample_envelope(device))
            .await
            .unwrap();
        let received = sub.recv().await.unwrap();
        assert_eq!(received.target_device_id, device);
    }

    #[tokio::test]
    async fn remove_clears_the_record() {
        let directory = InMemoryConnectionDirectory::new();
        let device = DeviceId::random();
        directory.register(device, "replica-a").await.unwrap();
        directory.remove(device).await.unwrap();
        assert!(directory.lookup(device).await.unwrap().is_none());
    }
}

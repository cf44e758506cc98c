// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The Maintenance Scheduler (§4.H): periodic, idempotent background jobs.
//! Each job runs on its own `tokio::time::interval` loop and stops when the
//! supplied `CancellationToken` fires, so a replica's graceful shutdown (§5)
//! can drain these the same way it drains client sockets.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_common::identifiers::DeviceId;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::auth::Authenticator;
use crate::auth::verification::VerificationCode;
use crate::connection_directory::ConnectionDirectory;
use crate::prekeys::PreKeyDirectory;
use crate::prekeys::signed_prekey::SignedPreKeyRecord;
use crate::queue::OfflineQueue;

const EXPIRE_VERIFICATION_CODES_PERIOD: Duration = Duration::from_secs(5 * 60);
const REAP_STALE_CONNECTIONS_PERIOD: Duration = Duration::from_secs(60);
const REPLENISHMENT_PROMPT_PERIOD: Duration = Duration::from_secs(30 * 60);
const EXPIRE_OFFLINE_ENVELOPES_PERIOD: Duration = Duration::from_secs(60);
const KEY_ROTATION_NOTICE_PERIOD: Duration = Duration::from_secs(3600);

/// Delivers the two "nudge the client" notifications the scheduler produces.
/// The websocket layer (server crate) is what actually has a live socket to
/// write a `ServerFrame` to; this crate only knows which devices need
/// nudging, so it reports through this trait rather than depending upward.
#[async_trait]
pub trait MaintenanceNotifier: Send + Sync {
    async fn notify_prekey_low(&self, device_id: DeviceId);
    async fn notify_rotate_signed_prekey(&self, device_id: DeviceId);
}

/// Dev/test stand-in that only logs.
pub struct LoggingNotifier;

#[async_trait]
impl MaintenanceNotifier for LoggingNotifier {
    async fn notify_prekey_low(&self, device_id: DeviceId) {
        info!(%device_id, "pre_key_low (no notifier wired)");
    }

    async fn notify_rotate_signed_prekey(&self, device_id: DeviceId) {
        info!(%device_id, "rotate_signed_prekey (no notifier wired)");
    }
}

pub struct MaintenanceScheduler {
    pool: PgPool,
    directory: Arc<dyn ConnectionDirectory>,
    queue: OfflineQueue,
    prekeys: Arc<PreKeyDirectory>,
    authenticator: Arc<Authenticator>,
    notifier: Arc<dyn MaintenanceNotifier>,
    signing_secret_rotation_interval: Duration,
}

impl MaintenanceScheduler {
    pub fn new(
        pool: PgPool,
        directory: Arc<dyn ConnectionDirectory>,
        queue: OfflineQueue,
        prekeys: Arc<PreKeyDirectory>,
        authenticator: Arc<Authenticator>,
        notifier: Arc<dyn MaintenanceNotifier>,
        signing_secret_rotation_interval: Duration,
    ) -> Self {
        Self {
            pool,
            directory,
            queue,
            prekeys,
            authenticator,
            notifier,
            signing_secret_rotation_interval,
        }
    }

    /// Spawns every job (§4.H table) as its own task, all cancelled together
    /// by `shutdown`.
    pub fn spawn_all(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.clone().spawn_loop(
                EXPIRE_VERIFICATION_CODES_PERIOD,
                shutdown.clone(),
                |s| Box::pin(s.expire_verification_codes()),
            ),
            self.clone().spawn_loop(
                self.signing_secret_rotation_interval,
                shutdown.clone(),
                |s| Box::pin(s.rotate_signing_secret()),
            ),
            self.clone().spawn_loop(
                REAP_STALE_CONNECTIONS_PERIOD,
                shutdown.clone(),
                |s| Box::pin(s.reap_stale_connections()),
            ),
            self.clone().spawn_loop(
                REPLENISHMENT_PROMPT_PERIOD,
                shutdown.clone(),
                |s| Box::pin(s.prompt_replenishment()),
            ),
            self.clone().spawn_loop(
                EXPIRE_OFFLINE_ENVELOPES_PERIOD,
                shutdown.clone(),
                |s| Box::pin(s.expire_offline_envelopes()),
            ),
            self.clone().spawn_loop(
                KEY_ROTATION_NOTICE_PERIOD,
                shutdown.clone(),
                |s| Box::pin(s.notify_key_rotation_need()),
            ),
        ]
    }

    fn spawn_loop(
        self: Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
        job: fn(Arc<Self>) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = interval.tick() => job(self.clone()).await,
                }
            }
        })
    }

    #[instrument(skip(self))]
    async fn expire_verification_codes(self: Arc<Self>) {
        match VerificationCode::expire(&self.pool).await {
            Ok(count) if count > 0 => info!(count, "expired verification codes"),
            Ok(_) => {}
            Err(err) => warn!(%err, "failed to expire verification codes"),
        }
    }

    #[instrument(skip(self))]
    async fn rotate_signing_secret(self: Arc<Self>) {
        self.authenticator.rotate_signing_secret();
    }

    #[instrument(skip(self))]
    async fn reap_stale_connections(self: Arc<Self>) {
        match self.directory.reap_expired().await {
            Ok(count) if count > 0 => info!(count, "reaped stale connection records"),
            Ok(_) => {}
            Err(err) => warn!(%err, "failed to reap stale connection records"),
        }
    }

    #[instrument(skip(self))]
    async fn prompt_replenishment(self: Arc<Self>) {
        let device_ids = match self.prekeys.devices_below_watermark().await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(%err, "failed to scan for low one-time-pre-key pools");
                return;
            }
        };
        for device_id in device_ids {
            if matches!(self.directory.lookup(device_id).await, Ok(Some(_))) {
                self.notifier.notify_prekey_low(device_id).await;
            }
        }
    }

    #[instrument(skip(self))]
    async fn expire_offline_envelopes(self: Arc<Self>) {
        match self.queue.expire().await {
            Ok(count) if count > 0 => info!(count, "expired offline envelopes"),
            Ok(_) => {}
            Err(err) => warn!(%err, "failed to expire offline envelopes"),
        }
    }

    #[instrument(skip(self))]
    async fn notify_key_rotation_need(self: Arc<Self>) {
        let device_ids = match SignedPreKeyRecord::load_stale_device_ids(&self.pool).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(%err, "failed to scan for stale signed pre-keys");
                return;
            }
        };
        for device_id in device_ids {
            self.notifier.notify_rotate_signed_prekey(device_id).await;
        }
    }
}

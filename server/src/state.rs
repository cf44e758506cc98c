// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The composition root (§9 "application-scoped composition root"): builds
//! every long-lived singleton once at startup and hands out `Arc` clones to
//! HTTP handlers and the WebSocket connection manager.

use std::sync::Arc;

use actix::Actor;
use relay_common::crypto::ear::EarKey;
use relay_common::crypto::mac::SigningSecret;
use relay_core::audit::AuditLog;
use relay_core::auth::signing_secret::SigningSecretPair;
use relay_core::auth::verification::{NullSmsDispatcher, SmsDispatcher};
use relay_core::auth::Authenticator;
use relay_core::connection_directory::{
    ConnectionDirectory, InMemoryConnectionDirectory, RedisConnectionDirectory,
};
use relay_core::prekeys::PreKeyDirectory;
use relay_core::push::{ApnsProvider, FcmProvider, PushDispatcher, PushProvider};
use relay_core::queue::OfflineQueue;
use relay_core::rate_limiter::{InMemoryRateLimiter, RateLimiter, RedisRateLimiter};
use relay_core::router::EnvelopeRouter;
use relay_core::scheduler::MaintenanceScheduler;
use relay_core::settings::Settings;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::ws::notifier::WsMaintenanceNotifier;
use crate::ws::registry::ConnectionRegistry;

/// Everything an HTTP handler or WS actor needs, cloned cheaply via `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub authenticator: Arc<Authenticator>,
    pub prekeys: Arc<PreKeyDirectory>,
    pub router: Arc<EnvelopeRouter>,
    pub queue: OfflineQueue,
    pub directory: Arc<dyn ConnectionDirectory>,
    pub push: Arc<PushDispatcher>,
    pub scheduler: Arc<MaintenanceScheduler>,
    pub registry: actix::Addr<ConnectionRegistry>,
    /// Identifies this process to the connection directory (§5, §6.3); a
    /// fresh random id per process start is sufficient since the directory
    /// only needs to distinguish replicas, not recognize restarts.
    pub replica_id: Arc<str>,
}

impl AppState {
    pub async fn build(settings: &Settings) -> Result<Self, anyhow::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.database.max_connections)
            .connect(&settings.database.connection_string())
            .await?;
        sqlx::migrate!("../backend/migrations").run(&pool).await?;
        Self::from_pool(pool, settings).await
    }

    /// Builds every other singleton against an already-connected, already-
    /// migrated pool — lets `relay-test-harness` hand in a `#[sqlx::test]`
    /// throwaway database instead of going through `database.connection_string()`.
    pub async fn from_pool(pool: PgPool, settings: &Settings) -> Result<Self, anyhow::Error> {
        Self::from_pool_with_sms(pool, settings, Arc::new(NullSmsDispatcher)).await
    }

    /// Same as [`Self::from_pool`] but lets the caller substitute the SMS
    /// collaborator (§1 "SMS code delivery... out of scope") — `relay-test-
    /// harness` installs a capturing double so tests can read back the
    /// verification code a real deployment would only ever send out-of-band.
    pub async fn from_pool_with_sms(
        pool: PgPool,
        settings: &Settings,
        sms: Arc<dyn SmsDispatcher>,
    ) -> Result<Self, anyhow::Error> {
        let directory: Arc<dyn ConnectionDirectory> = match &settings.connection_directory.redis_url
        {
            Some(url) => Arc::new(RedisConnectionDirectory::connect(url).await?),
            None => Arc::new(InMemoryConnectionDirectory::new()),
        };

        let rate_limiter: Arc<dyn RateLimiter> = match &settings.connection_directory.redis_url {
            Some(url) => {
                let client = redis::Client::open(url.as_str())?;
                let manager = client.get_connection_manager().await?;
                Arc::new(RedisRateLimiter::new(manager))
            }
            None => Arc::new(InMemoryRateLimiter::new()),
        };

        let signing_secrets = Arc::new(SigningSecretPair::with_overlap(
            SigningSecret::generate(),
            chrono::Duration::from_std(settings.auth.signing_secret_overlap)?,
        ));
        let push_token_key = EarKey::random();
        let audit = AuditLog::new(pool.clone());

        let authenticator = Arc::new(Authenticator::new(
            pool.clone(),
            signing_secrets,
            rate_limiter,
            sms,
            audit,
            push_token_key.clone(),
        ));

        let prekeys = Arc::new(PreKeyDirectory::new(pool.clone()));
        let queue = OfflineQueue::new(pool.clone());

        let apns: Option<Arc<dyn PushProvider>> = match &settings.apns {
            Some(cfg) => {
                let key_pem = tokio::fs::read(&cfg.privatekeypath).await?;
                Some(Arc::new(ApnsProvider::new(
                    &key_pem,
                    &cfg.keyid,
                    &cfg.teamid,
                    cfg.topic.clone(),
                    cfg.is_production,
                )?) as Arc<dyn PushProvider>)
            }
            None => None,
        };
        let fcm: Option<Arc<dyn PushProvider>> = match &settings.fcm {
            Some(cfg) => {
                let api_key = tokio::fs::read_to_string(&cfg.path).await?;
                Some(Arc::new(FcmProvider::new(api_key.trim().to_string())) as Arc<dyn PushProvider>)
            }
            None => None,
        };
        let push = Arc::new(PushDispatcher::new(pool.clone(), push_token_key, apns, fcm));

        let router = Arc::new(EnvelopeRouter::new(
            pool.clone(),
            directory.clone(),
            queue.clone(),
            push.clone(),
        ));

        let registry = ConnectionRegistry::new().start();

        let scheduler = Arc::new(MaintenanceScheduler::new(
            pool.clone(),
            directory.clone(),
            queue.clone(),
            prekeys.clone(),
            authenticator.clone(),
            Arc::new(WsMaintenanceNotifier(registry.clone())),
            settings.auth.signing_secret_rotation_interval,
        ));

        Ok(Self {
            pool,
            authenticator,
            prekeys,
            router,
            queue,
            directory,
            push,
            scheduler,
            registry,
            replica_id: Arc::from(uuid::Uuid::new_v4().to_string()),
        })
    }
}

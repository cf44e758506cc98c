// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The Push Notification Dispatcher (§4.F): wakes a device's OS-level push
//! service when an envelope was queued for it while offline. The dispatcher
//! never learns plaintext content — it sends an opaque wake-up, never the
//! ciphertext (§4.F "payload-free", §9).

pub mod errors;

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use apns2::{
    Client as ApnsClient, ClientConfig, DefaultNotificationBuilder, Endpoint, NotificationBuilder,
    NotificationOptions, Priority,
};
use async_trait::async_trait;
use fcm::{Client as FcmClient, MessageBuilder, NotificationBuilder as FcmNotificationBuilder};
use relay_common::crypto::ear::EarKey;
use relay_common::identifiers::{DeviceId, Platform};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::auth::device_record::DeviceRecord;

use self::errors::PushError;

/// Priority class for the outgoing push (§4.G: signaling envelopes wake the
/// device through the VoIP/high-priority path rather than the default one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushPriority {
    Normal,
    VoipHighPriority,
}

/// An opaque wake-up; `push_token` is the provider-specific device token,
/// already decrypted. No ciphertext or envelope metadata crosses this
/// boundary (§4.F).
pub struct PushWakeup<'a> {
    pub push_token: &'a [u8],
    pub priority: PushPriority,
}

/// One push transport. `Apns`/`Fcm` talk to the real providers; `Null` is
/// the dev-mode stand-in (mirrors `NullSmsDispatcher`, §B ambient stack).
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, wakeup: PushWakeup<'_>) -> Result<(), PushError>;
}

/// Apple Push Notification service, delivered via `apns2`'s HTTP/2 client
/// authenticated with the configured `.p8` key (§6.4 `ApnsSettings`). The
/// client isn't `Sync` over a mutable send, so it's held behind a `Mutex`
/// the way the corpus's own APNs wrapper does.
pub struct ApnsProvider {
    client: Mutex<ApnsClient>,
    topic: String,
}

impl ApnsProvider {
    /// `key_pem` is the contents of the configured `.p8` key file.
    pub fn new(key_pem: &[u8], keyid: &str, teamid: &str, topic: String, is_production: bool) -> Result<Self, PushError> {
        let endpoint = if is_production { Endpoint::Production } else { Endpoint::Sandbox };
        let config = ClientConfig::new(endpoint);
        let mut reader = Cursor::new(key_pem);
        let client = ApnsClient::token(&mut reader, keyid, teamid, config)
            .map_err(|e| PushError::ProviderUnavailable(format!("failed to init apns client: {e}")))?;
        Ok(Self {
            client: Mutex::new(client),
            topic,
        })
    }
}

#[async_trait]
impl PushProvider for ApnsProvider {
    #[instrument(skip(self, wakeup))]
    async fn send(&self, wakeup: PushWakeup<'_>) -> Result<(), PushError> {
        let priority = match wakeup.priority {
            PushPriority::VoipHighPriority => Priority::High,
            PushPriority::Normal => Priority::Normal,
        };
        // Content-available wakeup, no alert text: the payload never
        // carries plaintext or envelope metadata (§4.F "payload-free").
        let builder = DefaultNotificationBuilder::new().set_content_available();
        let options = NotificationOptions {
            apns_topic: Some(&self.topic),
            apns_priority: Some(priority),
            ..Default::default()
        };
        let token = hex::encode(wakeup.push_token);
        let payload = builder.build(&token, options);

        let client = self.client.lock().await;
        match client.send(payload).await {
            Ok(_) => Ok(()),
            Err(apns2::Error::ResponseError(response)) if response.code == 410 => {
                Err(PushError::Unregistered)
            }
            Err(e) => Err(PushError::ProviderUnavailable(e.to_string())),
        }
    }
}

/// Firebase Cloud Messaging, delivered via the `fcm` crate's HTTP v1 client
/// (§6.4 `FcmSettings`).
pub struct FcmProvider {
    client: FcmClient,
    api_key: String,
}

impl FcmProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: FcmClient::new(),
            api_key,
        }
    }
}

#[async_trait]
impl PushProvider for FcmProvider {
    #[instrument(skip(self, wakeup))]
    async fn send(&self, wakeup: PushWakeup<'_>) -> Result<(), PushError> {
        let token = String::from_utf8_lossy(wakeup.push_token);
        let priority = match wakeup.priority {
            PushPriority::VoipHighPriority => "high",
            PushPriority::Normal => "normal",
        };
        let mut notification_builder = FcmNotificationBuilder::new();
        notification_builder.sound("default");
        let mut message_builder = MessageBuilder::new(&self.api_key, &token);
        message_builder
            .notification(notification_builder.finalize())
            .priority(match priority {
                "high" => fcm::Priority::High,
                _ => fcm::Priority::Normal,
            });

        match self.client.send(message_builder.finalize()).await {
            Ok(response) if response.message_id.is_some() => Ok(()),
            Ok(_) => Err(PushError::Unregistered),
            Err(fcm::FcmError::Unauthorized) => {
                Err(PushError::ProviderUnavailable("fcm rejected the api key".to_string()))
            }
            Err(e) => Err(PushError::ProviderUnavailable(e.to_string())),
        }
    }
}

/// Dev-mode stand-in: every wakeup succeeds without talking to anyone.
pub struct NullPushProvider;

#[async_trait]
impl PushProvider for NullPushProvider {
    async fn send(&self, _wakeup: PushWakeup<'_>) -> Result<(), PushError> {
        Ok(())
    }
}

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(200);

pub struct PushDispatcher {
    pool: PgPool,
    ear_key: EarKey,
    apns: Option<Arc<dyn PushProvider>>,
    fcm: Option<Arc<dyn PushProvider>>,
}

impl PushDispatcher {
    pub fn new(
        pool: PgPool,
        ear_key: EarKey,
        apns: Option<Arc<dyn PushProvider>>,
        fcm: Option<Arc<dyn PushProvider>>,
    ) -> Self {
        Self {
            pool,
            ear_key,
            apns,
            fcm,
        }
    }

    fn provider_for(&self, platform: Platform) -> Option<&Arc<dyn PushProvider>> {
        match platform {
            Platform::Ios => self.apns.as_ref(),
            Platform::Android => self.fcm.as_ref(),
            // Web and desktop rely on the persistent transport reconnecting
            // and draining the offline queue; there is no push provider for
            // them (§4.F covers mobile wake-up only).
            Platform::Web | Platform::Desktop => None,
        }
    }

    /// `dispatch(device, priority)` (§4.F): decrypts the stored token,
    /// retries with exponential backoff up to `MAX_ATTEMPTS`, and clears the
    /// token if the provider reports it unregistered.
    #[instrument(skip(self), fields(device_id = %device_id), err)]
    pub async fn dispatch(&self, device_id: DeviceId, priority: PushPriority) -> Result<(), PushError> {
        let device = DeviceRecord::load(&self.pool, device_id)
            .await?
            .ok_or(PushError::NoToken)?;
        let Some(provider) = self.provider_for(device.platform) else {
            return Err(PushError::NoToken);
        };
        let Some(token) = device.decrypt_push_token(&self.ear_key) else {
            return Err(PushError::NoToken);
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let wakeup = PushWakeup {
                push_token: &token,
                priority,
            };
            match provider.send(wakeup).await {
                Ok(()) => return Ok(()),
                Err(PushError::Unregistered) => {
                    DeviceRecord::clear_push_token(&self.pool, device_id).await?;
                    return Err(PushError::Unregistered);
                }
                Err(err) if attempt < MAX_ATTEMPTS => {
                    warn!(attempt, %err, "push provider attempt failed, retrying");
                    tokio::time::sleep(BASE_BACKOFF * 2u32.pow(attempt - 1)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

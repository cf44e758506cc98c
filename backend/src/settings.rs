// SPDX-FileCopyrightText: 2024 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration shape loaded by `relay-server` via the layered `config`
//! crate (SPEC_FULL §B). Kept in the core crate, not the server binary, so
//! that `test_harness` can construct a `Settings` value without depending on
//! `relay-server`.

use std::time::Duration;

use serde::Deserialize;

use relay_common::DEFAULT_PORT_HTTP;

/// Top-level configuration for a relay replica (§6.4).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub connection_directory: ConnectionDirectorySettings,
    pub application: ApplicationSettings,
    /// Absent disables Apple push delivery; offline envelopes for iOS
    /// devices still queue, they just never wake the app (§4.F).
    pub apns: Option<ApnsSettings>,
    /// Absent disables FCM push delivery, same semantics as `apns`.
    pub fcm: Option<FcmSettings>,
    #[serde(default)]
    pub auth: AuthSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    #[serde(default = "default_port")]
    pub port: u16,
    pub host: String,
    pub domain: String,
    /// Returns verification codes in the `auth/request` response instead of
    /// dispatching them via SMS. Refusing to start with this on outside
    /// `local` is enforced by the server binary, not here (§6.4).
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT_HTTP
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.name
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionDirectorySettings {
    /// `redis://...` URL. When absent, the server falls back to the
    /// in-process `InMemoryConnectionDirectory` (single replica only).
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApnsSettings {
    pub keyid: String,
    pub teamid: String,
    pub privatekeypath: String,
    /// APNs topic (the app's bundle id) stamped on every notification.
    pub topic: String,
    /// Selects `api.push.apple.com` over the sandbox endpoint.
    #[serde(default)]
    pub is_production: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcmSettings {
    /// Path to a file holding the FCM server API key.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_rotation_interval", with = "hours")]
    pub signing_secret_rotation_interval: Duration,
    #[serde(default = "default_overlap", with = "hours")]
    pub signing_secret_overlap: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            signing_secret_rotation_interval: default_rotation_interval(),
            signing_secret_overlap: default_overlap(),
        }
    }
}

fn default_rotation_interval() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_overlap() -> Duration {
    Duration::from_secs(24 * 3600)
}

mod hours {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let hours = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(hours * 3600))
    }
}

// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Starts a real `relay-server` `App` against a throwaway database and
//! drives it the way a client would: REST calls via `reqwest`, the
//! persistent transport via `tokio-tungstenite`. Mirrors the teacher's
//! `spawn_app` (`server/tests/utils/mod.rs`), adapted for a single-domain,
//! non-federated deployment backed by `#[sqlx::test]` instead of Docker.

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use relay_common::crypto::agreement::AgreementKeyBytes;
use relay_common::crypto::signatures::SigningKeyPair;
use relay_common::identifiers::{DeviceId, PhoneNumber, Platform, UserId};
use relay_common::messages::{ClientFrame, ServerFrame};
use relay_core::auth::verification::{SmsDispatcher, SmsError};
use relay_core::prekeys::bundle::{SignedPreKeyView};
use relay_server::configurations::get_configuration_from_str;
use relay_server::state::AppState;
use serde::Deserialize;
use sqlx::PgPool;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::force_tracing;

const BASE_CONFIG: &str = r#"
application:
  host: 127.0.0.1
  port: 0
  domain: localhost
  dev_mode: true

database:
  username: postgres
  password: password
  port: 5432
  host: localhost
  name: unused

connection_directory:
  redis_url: ~

apns: ~
fcm: ~

auth:
  signing_secret_rotation_interval: 24
  signing_secret_overlap: 24
"#;

/// Captures every code a test deployment would have sent out-of-band
/// (§1 "SMS code delivery... out of scope") so tests can read it back
/// instead of parsing an SMS.
#[derive(Default, Clone)]
pub struct CapturingSmsDispatcher {
    codes: Arc<Mutex<HashMap<String, String>>>,
}

impl CapturingSmsDispatcher {
    pub fn code_for(&self, phone: &str) -> Option<String> {
        self.codes.lock().unwrap().get(phone).cloned()
    }
}

#[async_trait]
impl SmsDispatcher for CapturingSmsDispatcher {
    async fn send(&self, phone: &PhoneNumber, code: &str) -> Result<(), SmsError> {
        self.codes
            .lock()
            .unwrap()
            .insert(phone.as_str().to_string(), code.to_string());
        Ok(())
    }
}

/// A running `relay-server` instance plus everything a test needs to talk
/// to it (§8 scenarios).
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub sms: CapturingSmsDispatcher,
    pub pool: PgPool,
    /// Kept alongside the copy handed to the running server so scenarios
    /// that need to reach past the REST surface (rotation, the connection
    /// registry) can do so directly, the way the teacher's scenarios reach
    /// into the storage providers they hand to `spawn_app`.
    pub state: AppState,
}

/// Starts the app against `pool` (handed in by a `#[sqlx::test]` function),
/// binds an ephemeral port, and returns a handle to drive it.
pub async fn spawn_app(pool: PgPool) -> TestApp {
    force_tracing();

    let settings =
        get_configuration_from_str(BASE_CONFIG, "").expect("failed to parse test configuration");

    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind ephemeral port");
    let address = listener.local_addr().unwrap().to_string();

    let sms = CapturingSmsDispatcher::default();
    let state = AppState::from_pool_with_sms(pool.clone(), &settings, Arc::new(sms.clone()))
        .await
        .expect("failed to build application state");

    let server = relay_server::run(listener, state.clone()).expect("failed to bind server");
    tokio::spawn(server);

    TestApp {
        address,
        client: reqwest::Client::new(),
        sms,
        pool,
        state,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }
}

#[derive(Deserialize)]
struct VerifyResponseDto {
    access_token: String,
    refresh_token: String,
    user_id: UserId,
    #[allow(dead_code)]
    user_exists: bool,
}

#[derive(Deserialize)]
struct RegisterDeviceResponseDto {
    device_id: DeviceId,
    access_token: String,
}

/// A fully onboarded client: a verified phone number, one registered
/// device, and the identity/device signing keys the caller needs to publish
/// pre-keys (§4.A, §4.B).
pub struct TestUser {
    pub phone: PhoneNumber,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub access_token: String,
    pub refresh_token: String,
    pub identity_key: SigningKeyPair,
    pub device_key: SigningKeyPair,
}

impl TestUser {
    /// Runs the whole onboarding sequence against `app`: `/auth/request`,
    /// `/auth/verify`, `/auth/register_device` (§4.A, §6.2).
    pub async fn onboard(app: &TestApp, phone: &str) -> Self {
        let phone = PhoneNumber::parse(phone).expect("test phone number must be E.164");

        app.client
            .post(app.url("/api/v1/auth/request"))
            .json(&serde_json::json!({ "phone": phone.as_str() }))
            .send()
            .await
            .expect("auth/request failed")
            .error_for_status()
            .expect("auth/request returned an error status");

        let code = app
            .sms
            .code_for(phone.as_str())
            .expect("verification code was never captured");

        let verify: VerifyResponseDto = app
            .client
            .post(app.url("/api/v1/auth/verify"))
            .json(&serde_json::json!({ "phone": phone.as_str(), "code": code }))
            .send()
            .await
            .expect("auth/verify failed")
            .error_for_status()
            .expect("auth/verify returned an error status")
            .json()
            .await
            .expect("auth/verify returned malformed json");

        let device_key = SigningKeyPair::generate();
        let register: RegisterDeviceResponseDto = app
            .client
            .post(app.url("/api/v1/auth/register_device"))
            .bearer_auth(&verify.access_token)
            .json(&serde_json::json!({
                "device_signing_pubkey": device_key.verifying_key(),
                "platform": Platform::Ios,
            }))
            .send()
            .await
            .expect("auth/register_device failed")
            .error_for_status()
            .expect("auth/register_device returned an error status")
            .json()
            .await
            .expect("auth/register_device returned malformed json");

        Self {
            phone,
            user_id: verify.user_id,
            device_id: register.device_id,
            access_token: register.access_token,
            refresh_token: verify.refresh_token,
            identity_key: SigningKeyPair::generate(),
            device_key,
        }
    }

    /// `/keys/publish` (§4.B) with one freshly generated signed pre-key and
    /// `count` one-time pre-keys.
    pub async fn publish_prekeys(&self, app: &TestApp, key_id: i32, count: i32) {
        let prekey = AgreementKeyBytes::random_for_test();
        let signature = self
            .identity_key
            .sign(&relay_core::prekeys::signed_prekey::signing_payload(key_id, &prekey));
        let one_time_prekeys: Vec<(i32, AgreementKeyBytes)> = (0..count)
            .map(|i| (key_id + 1 + i, AgreementKeyBytes::random_for_test()))
            .collect();

        app.client
            .post(app.url("/api/v1/keys/publish"))
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({
                "identity_key": self.identity_key.verifying_key(),
                "signed_prekey": { "id": key_id, "key": prekey, "signature": signature },
                "one_time_prekeys": one_time_prekeys,
            }))
            .send()
            .await
            .expect("keys/publish failed")
            .error_for_status()
            .expect("keys/publish returned an error status");
    }

    /// Connects to `/ws` and completes the auth handshake, returning the
    /// open socket ready to send/receive frames (§4.C, §6.1).
    pub async fn connect_ws(
        &self,
        app: &TestApp,
    ) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
        let url = format!("ws://{}/ws", app.address);
        let (mut socket, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("failed to open websocket");

        let auth = ClientFrame::Auth {
            token: self.access_token.clone(),
            device_id: self.device_id,
        };
        socket
            .send(WsMessage::Text(serde_json::to_string(&auth).unwrap()))
            .await
            .expect("failed to send auth frame");

        let reply = socket
            .next()
            .await
            .expect("connection closed before AuthOk")
            .expect("websocket protocol error");
        let frame: ServerFrame =
            serde_json::from_str(reply.to_text().expect("non-text auth reply")).unwrap();
        assert!(matches!(frame, ServerFrame::AuthOk), "handshake did not succeed");

        socket
    }
}

/// Shorthand for a single device-bound X3DH bundle view, used by scenarios
/// that only care about the signed pre-key (§4.B claim_bundle).
pub fn first_signed_prekey(bundle: &relay_core::prekeys::bundle::DeviceBundle) -> &SignedPreKeyView {
    &bundle.signed_prekey
}

// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Black-box scenarios against a full `relay-server` instance (§8). Mirrors
//! the teacher's `server/tests/mod.rs`: one `#[sqlx::test]`-backed database
//! per test, a real socket, a real HTTP client.

use std::collections::HashSet;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use relay_common::messages::{CiphertextType, ClientFrame, CloseCode, ServerFrame};
use relay_test_harness::{spawn_app, TestUser};
use sqlx::PgPool;
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[sqlx::test(migrations = "../backend/migrations")]
async fn health_check_responds_ok(pool: PgPool) -> anyhow::Result<()> {
    let app = spawn_app(pool).await;
    let response = reqwest::get(app.url("/health")).await?;
    assert!(response.status().is_success());
    Ok(())
}

#[sqlx::test(migrations = "../backend/migrations")]
async fn onboarding_then_envelope_round_trip_over_websocket(pool: PgPool) -> anyhow::Result<()> {
    let app = spawn_app(pool).await;
    let alice = TestUser::onboard(&app, "+15551000001").await;
    let bob = TestUser::onboard(&app, "+15551000002").await;

    let mut alice_socket = alice.connect_ws(&app).await;
    let mut bob_socket = bob.connect_ws(&app).await;

    let envelope = ClientFrame::Envelope {
        envelope_id: relay_common::identifiers::EnvelopeId::random(),
        target_user: bob.user_id,
        target_device: Some(bob.device_id),
        ciphertext_type: CiphertextType::NormalMessage,
        ciphertext: b"hello bob".to_vec(),
    };
    alice_socket
        .send(WsMessage::Text(serde_json::to_string(&envelope)?))
        .await?;

    let received = tokio::time::timeout(Duration::from_secs(5), bob_socket.next())
        .await?
        .expect("socket closed before envelope arrived")?;
    let frame: ServerFrame = serde_json::from_str(received.to_text()?)?;
    match frame {
        ServerFrame::Envelope { sender_user, ciphertext, .. } => {
            assert_eq!(sender_user, alice.user_id);
            assert_eq!(ciphertext, b"hello bob");
        }
        other => panic!("unexpected frame: {other:?}"),
    }
    Ok(())
}

#[sqlx::test(migrations = "../backend/migrations")]
async fn envelope_sent_while_recipient_is_offline_is_delivered_on_reconnect(
    pool: PgPool,
) -> anyhow::Result<()> {
    let app = spawn_app(pool).await;
    let alice = TestUser::onboard(&app, "+15551000003").await;
    let bob = TestUser::onboard(&app, "+15551000004").await;

    // Bob never connects before the send; the router must spool it (§4.D, §4.E).
    let mut alice_socket = alice.connect_ws(&app).await;
    let envelope = ClientFrame::Envelope {
        envelope_id: relay_common::identifiers::EnvelopeId::random(),
        target_user: bob.user_id,
        target_device: Some(bob.device_id),
        ciphertext_type: CiphertextType::NormalMessage,
        ciphertext: b"while you were out".to_vec(),
    };
    alice_socket
        .send(WsMessage::Text(serde_json::to_string(&envelope)?))
        .await?;
    // Give the router a moment to persist before Bob connects.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut bob_socket = bob.connect_ws(&app).await;
    let received = tokio::time::timeout(Duration::from_secs(5), bob_socket.next())
        .await?
        .expect("socket closed before the queued envelope was drained")?;
    let frame: ServerFrame = serde_json::from_str(received.to_text()?)?;
    match frame {
        ServerFrame::Envelope { ciphertext, .. } => assert_eq!(ciphertext, b"while you were out"),
        other => panic!("unexpected frame: {other:?}"),
    }
    Ok(())
}

#[sqlx::test(migrations = "../backend/migrations")]
async fn fifty_concurrent_claims_never_double_allocate_a_one_time_prekey(
    pool: PgPool,
) -> anyhow::Result<()> {
    let app = spawn_app(pool).await;
    let alice = TestUser::onboard(&app, "+15551000005").await;
    alice.publish_prekeys(&app, 1, 30).await;

    let claims = futures_util::future::join_all((0..50).map(|_| {
        let client = app.client.clone();
        let url = app.url(&format!("/api/v1/keys/bundle/{}", alice.user_id));
        let token = alice.access_token.clone();
        async move {
            client
                .get(url)
                .bearer_auth(token)
                .send()
                .await
                .unwrap()
                .json::<Vec<relay_core::prekeys::bundle::DeviceBundle>>()
                .await
                .unwrap()
        }
    }))
    .await;

    let mut claimed_key_ids = HashSet::new();
    let mut empty_pool_claims = 0;
    for bundles in &claims {
        assert_eq!(bundles.len(), 1, "alice has exactly one device");
        match &bundles[0].one_time_prekey {
            Some(otk) => assert!(claimed_key_ids.insert(otk.key_id), "key_id claimed twice"),
            None => empty_pool_claims += 1,
        }
    }
    assert_eq!(claimed_key_ids.len(), 30);
    assert_eq!(empty_pool_claims, 20);
    Ok(())
}

#[sqlx::test(migrations = "../backend/migrations")]
async fn refresh_token_is_single_use(pool: PgPool) -> anyhow::Result<()> {
    let app = spawn_app(pool).await;
    let alice = TestUser::onboard(&app, "+15551000006").await;

    let first = app
        .client
        .post(app.url("/api/v1/auth/refresh"))
        .json(&serde_json::json!({ "refresh_token": alice.refresh_token }))
        .send()
        .await?;
    assert!(first.status().is_success());
    let first_body: serde_json::Value = first.json().await?;
    let access_token_from_first_refresh = first_body["access_token"].as_str().unwrap().to_string();

    // Replaying the same (now-used) refresh token must fail (§8 "refresh-
    // token theft" round trip): its row is marked used, not deleted.
    let replay = app
        .client
        .post(app.url("/api/v1/auth/refresh"))
        .json(&serde_json::json!({ "refresh_token": alice.refresh_token }))
        .send()
        .await?;
    assert_eq!(replay.status(), reqwest::StatusCode::UNAUTHORIZED);

    // The replay is treated as suspected theft, so the entire family --
    // including the access token minted by the first, legitimate refresh --
    // is revoked too (§4.A, §8 round-trip law).
    let probe = app
        .client
        .get(app.url(&format!("/api/v1/users/search?q={}", alice.phone.as_str())))
        .bearer_auth(&access_token_from_first_refresh)
        .send()
        .await?;
    assert_eq!(probe.status(), reqwest::StatusCode::UNAUTHORIZED);
    Ok(())
}

#[sqlx::test(migrations = "../backend/migrations")]
async fn signing_secret_rotation_keeps_tokens_minted_under_the_old_secret_valid(
    pool: PgPool,
) -> anyhow::Result<()> {
    let app = spawn_app(pool).await;
    let alice = TestUser::onboard(&app, "+15551000007").await;

    app.state.authenticator.rotate_signing_secret();

    // The token minted before rotation still carries a valid generation tag
    // (§4.A dual-key rotation window) and must keep authenticating.
    let response = app
        .client
        .get(app.url(&format!("/api/v1/users/search?q={}", alice.phone.as_str())))
        .bearer_auth(&alice.access_token)
        .send()
        .await?;
    assert!(response.status().is_success());
    Ok(())
}

#[sqlx::test(migrations = "../backend/migrations")]
async fn broadcast_shutdown_closes_every_connection_with_4005(pool: PgPool) -> anyhow::Result<()> {
    let app = spawn_app(pool).await;
    let alice = TestUser::onboard(&app, "+15551000008").await;
    let bob = TestUser::onboard(&app, "+15551000009").await;

    let mut alice_socket = alice.connect_ws(&app).await;
    let mut bob_socket = bob.connect_ws(&app).await;

    app.state
        .registry
        .do_send(relay_server::ws::messages::BroadcastShutdown);

    for socket in [&mut alice_socket, &mut bob_socket] {
        let close = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await?
            .expect("socket dropped without a close frame")?;
        match close {
            WsMessage::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), CloseCode::ServerShutdown as u16)
            }
            other => panic!("expected a close frame, got {other:?}"),
        }
    }
    Ok(())
}

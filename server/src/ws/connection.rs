// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The per-socket connection actor (§4.C persistent transport). Mirrors the
//! teacher's `QsWsConnection` in `server/src/endpoints/qs/ws/mod.rs`: a
//! heartbeat-checked `ws::WebsocketContext` actor that authenticates on its
//! first frame, then bridges the socket to the router and offline queue.

use std::time::{Duration, Instant};

use actix::{fut, Actor, ActorContext, ActorFutureExt, Addr, AsyncContext, Handler, StreamHandler};
use actix_web_actors::ws;
use futures_util::TryStreamExt;
use relay_common::identifiers::{DeviceId, EnvelopeId};
use relay_common::messages::{AuthErrorReason, CiphertextType, ClientFrame, CloseCode, Envelope, ServerFrame};
use relay_core::connection_directory::{ConnectionDirectory, Subscription, CONNECTION_RECORD_TTL};
use tracing::{info, warn};

use crate::state::AppState;

use super::messages::{Connect, DeliverFrame, Disconnect, ShutdownConnection};
use super::registry::ConnectionRegistry;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CLIENT_TIMEOUT: Duration = CONNECTION_RECORD_TTL;

struct Active {
    user_id: relay_common::identifiers::UserId,
    device_id: DeviceId,
}

pub struct WsConnection {
    state: AppState,
    registry: Addr<ConnectionRegistry>,
    last_heartbeat: Instant,
    active: Option<Active>,
}

impl WsConnection {
    pub fn new(state: AppState, registry: Addr<ConnectionRegistry>) -> Self {
        Self {
            state,
            registry,
            last_heartbeat: Instant::now(),
            active: None,
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("client heartbeat timed out, closing");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
            if let Some(active) = &act.active {
                let directory = act.state.directory.clone();
                let device_id = active.device_id;
                ctx.spawn(fut::wrap_future(async move {
                    let _ = directory.heartbeat(device_id).await;
                }));
            }
        });
    }

    fn handshake_deadline(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_later(HANDSHAKE_TIMEOUT, |act, ctx| {
            if act.active.is_none() {
                info!("handshake deadline elapsed without an auth frame, closing");
                ctx.stop();
            }
        });
    }

    fn handle_client_frame(&mut self, frame: ClientFrame, ctx: &mut ws::WebsocketContext<Self>) {
        match frame {
            ClientFrame::Auth { token, device_id } => self.authenticate(token, device_id, ctx),
            ClientFrame::Pong => {
                self.last_heartbeat = Instant::now();
            }
            ClientFrame::Envelope {
                envelope_id,
                target_user,
                target_device,
                ciphertext_type,
                ciphertext,
            } => {
                let Some(active) = &self.active else {
                    ctx.stop();
                    return;
                };
                let router = self.state.router.clone();
                let sender_user_id = active.user_id;
                let sender_device_id = active.device_id;
                ctx.spawn(fut::wrap_future(async move {
                    router
                        .ingest(
                            envelope_id,
                            sender_user_id,
                            sender_device_id,
                            target_user,
                            target_device,
                            ciphertext_type,
                            ciphertext,
                        )
                        .await
                }).map(|result, _act, ctx: &mut ws::WebsocketContext<Self>| {
                    if let Err(error) = result {
                        warn!(%error, "envelope ingest failed");
                        if let Some(code) = relay_common::error::HasErrorKind::kind(&error).ws_close_code() {
                            ctx.close(Some(ws::CloseReason {
                                code: ws::CloseCode::Other(code),
                                description: None,
                            }));
                            ctx.stop();
                        }
                    }
                }));
            }
            ClientFrame::Ack { envelope_id } => {
                let Some(active) = &self.active else {
                    ctx.stop();
                    return;
                };
                let queue = self.state.queue.clone();
                let device_id = active.device_id;
                ctx.spawn(fut::wrap_future(async move {
                    let _ = queue.ack(device_id, envelope_id).await;
                }));
            }
            // Typing/Presence carry no server-side semantics (§4.C); accepted
            // only so the socket doesn't error on a legitimate client frame.
            ClientFrame::Typing | ClientFrame::Presence => {}
            ClientFrame::Receipt { envelope_id, kind } => {
                let Some(active) = &self.active else {
                    ctx.stop();
                    return;
                };
                let queue = self.state.queue.clone();
                let router = self.state.router.clone();
                let receipt_user_id = active.user_id;
                let receipt_device_id = active.device_id;
                ctx.spawn(fut::wrap_future(async move {
                    let Ok(Some((sender_user_id, sender_device_id))) =
                        queue.lookup_sender(receipt_device_id, envelope_id).await
                    else {
                        return;
                    };
                    let ciphertext = serde_json::to_vec(&serde_json::json!({
                        "envelope_id": envelope_id,
                        "kind": kind,
                    }))
                    .expect("receipt payload serializes");
                    let _ = router
                        .ingest(
                            EnvelopeId::random(),
                            receipt_user_id,
                            receipt_device_id,
                            sender_user_id,
                            Some(sender_device_id),
                            CiphertextType::Receipt,
                            ciphertext,
                        )
                        .await;
                }));
            }
        }
    }

    fn authenticate(&mut self, token: String, device_id: DeviceId, ctx: &mut ws::WebsocketContext<Self>) {
        if self.active.is_some() {
            return;
        }
        let authenticator = self.state.authenticator.clone();
        let directory = self.state.directory.clone();
        let queue = self.state.queue.clone();
        let replica_id = self.state.replica_id.clone();

        let fut = async move {
            let claims = authenticator
                .validate(&token, device_id)
                .await
                .map_err(|_| AuthErrorReason::InvalidToken)?;
            directory
                .register(device_id, replica_id.as_ref())
                .await
                .map_err(|_| AuthErrorReason::InvalidToken)?;
            let subscription = directory
                .subscribe(device_id)
                .await
                .map_err(|_| AuthErrorReason::InvalidToken)?;
            let pending: Vec<Envelope> = queue
                .drain_on_connect(device_id)
                .try_collect()
                .await
                .map_err(|_| AuthErrorReason::InvalidToken)?;
            Ok::<_, AuthErrorReason>((claims.user_id, subscription, pending))
        };

        ctx.spawn(fut::wrap_future(fut).map(move |result, act, ctx| {
            match result {
                Ok((user_id, subscription, pending)) => {
                    act.active = Some(Active { user_id, device_id });
                    act.registry.do_send(Connect {
                        device_id,
                        addr: ctx.address(),
                    });
                    ctx.text(serde_json::to_string(&ServerFrame::AuthOk).expect("ServerFrame serializes"));
                    for envelope in pending {
                        ctx.text(
                            serde_json::to_string(&ServerFrame::Envelope {
                                envelope_id: envelope.envelope_id,
                                sender_user: envelope.sender_user_id,
                                sender_device: envelope.sender_device_id,
                                ciphertext_type: envelope.ciphertext_type,
                                ciphertext: envelope.ciphertext,
                            })
                            .expect("ServerFrame serializes"),
                        );
                    }
                    act.spawn_envelope_forwarder(ctx, subscription);
                }
                Err(reason) => {
                    ctx.text(
                        serde_json::to_string(&ServerFrame::AuthError { reason })
                            .expect("ServerFrame serializes"),
                    );
                    ctx.close(Some(ws::CloseReason {
                        code: ws::CloseCode::Other(CloseCode::AuthFailure as u16),
                        description: None,
                    }));
                    ctx.stop();
                }
            }
        }));
    }

    /// Forwards everything the cross-replica directory publishes for this
    /// device (§5, §6.3) onto the socket, for the lifetime of the actor.
    fn spawn_envelope_forwarder(
        &self,
        ctx: &mut ws::WebsocketContext<Self>,
        mut subscription: Subscription,
    ) {
        let addr = ctx.address();
        let fut = async move {
            while let Some(envelope) = subscription.recv().await {
                addr.do_send(DeliverFrame(ServerFrame::Envelope {
                    envelope_id: envelope.envelope_id,
                    sender_user: envelope.sender_user_id,
                    sender_device: envelope.sender_device_id,
                    ciphertext_type: envelope.ciphertext_type,
                    ciphertext: envelope.ciphertext,
                }));
            }
        };
        ctx.spawn(fut::wrap_future(fut));
    }
}

impl Actor for WsConnection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);
        self.handshake_deadline(ctx);
    }

    fn stopping(&mut self, ctx: &mut Self::Context) -> actix::Running {
        if let Some(active) = &self.active {
            let directory = self.state.directory.clone();
            let device_id = active.device_id;
            self.registry.do_send(Disconnect {
                device_id,
                addr: ctx.address(),
            });
            actix::spawn(async move {
                let _ = directory.remove(device_id).await;
            });
        }
        actix::Running::Stop
    }
}

impl Handler<DeliverFrame> for WsConnection {
    type Result = ();

    fn handle(&mut self, msg: DeliverFrame, ctx: &mut Self::Context) {
        ctx.text(serde_json::to_string(&msg.0).expect("ServerFrame serializes"));
    }
}

impl Handler<ShutdownConnection> for WsConnection {
    type Result = ();

    fn handle(&mut self, msg: ShutdownConnection, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Other(msg.0),
            description: None,
        }));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsConnection {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let message = match item {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, "websocket protocol error");
                ctx.stop();
                return;
            }
        };
        match message {
            ws::Message::Ping(msg) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            ws::Message::Pong(_) => {
                self.last_heartbeat = Instant::now();
            }
            ws::Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => self.handle_client_frame(frame, ctx),
                Err(error) => {
                    warn!(%error, "failed to parse client frame");
                    ctx.stop();
                }
            },
            ws::Message::Binary(_) => {
                // The protocol is framed JSON text (§6.1); a binary frame
                // from a conforming client never happens.
            }
            ws::Message::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Continuation(_) | ws::Message::Nop => {}
        }
    }
}

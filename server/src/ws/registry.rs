// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The per-replica connection registrar (§4.C, §4.H). One actor per
//! process; every [`WsConnection`] registers itself on successful auth and
//! deregisters on close. Mirrors the teacher's `Dispatch` actor in
//! `server/src/endpoints/qs/ws/dispatch.rs`.

use std::collections::HashMap;

use actix::{Actor, Context, Handler};
use relay_common::identifiers::DeviceId;
use tracing::debug;

use super::connection::WsConnection;
use super::messages::{BroadcastShutdown, Connect, Disconnect, DeliverFrame, NotifyDevice, ShutdownConnection};

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<DeviceId, actix::Addr<WsConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Actor for ConnectionRegistry {
    type Context = Context<Self>;
}

impl Handler<Connect> for ConnectionRegistry {
    type Result = ();

    fn handle(&mut self, msg: Connect, _ctx: &mut Self::Context) {
        if let Some(previous) = self.connections.insert(msg.device_id, msg.addr) {
            debug!(device_id = %msg.device_id, "new connection superseded an existing one");
            previous.do_send(ShutdownConnection(relay_common::messages::CloseCode::ReplacedByNewerConnection as u16));
        }
    }
}

impl Handler<Disconnect> for ConnectionRegistry {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _ctx: &mut Self::Context) {
        if let Some(current) = self.connections.get(&msg.device_id) {
            if current == &msg.addr {
                self.connections.remove(&msg.device_id);
            }
        }
    }
}

impl Handler<NotifyDevice> for ConnectionRegistry {
    type Result = ();

    fn handle(&mut self, msg: NotifyDevice, _ctx: &mut Self::Context) {
        if let Some(addr) = self.connections.get(&msg.device_id) {
            addr.do_send(DeliverFrame(msg.frame));
        }
    }
}

impl Handler<BroadcastShutdown> for ConnectionRegistry {
    type Result = ();

    fn handle(&mut self, _msg: BroadcastShutdown, _ctx: &mut Self::Context) {
        for addr in self.connections.values() {
            addr.do_send(ShutdownConnection(
                relay_common::messages::CloseCode::ServerShutdown as u16,
            ));
        }
    }
}

// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Internal actix messages exchanged between a connection actor and the
//! per-replica [`super::registry::ConnectionRegistry`] (§3.1, §4.C, §5).
//! Mirrors the teacher's `InternalQsWsMessage` / `Dispatch` split: the
//! registry only ever talks `Addr<WsConnection>`, never the wire protocol.

use actix::{Addr, Message};
use relay_common::identifiers::DeviceId;
use relay_common::messages::ServerFrame;

use super::connection::WsConnection;

/// Push a frame down this socket (§4.C, §4.F, §4.H nudges).
#[derive(Message)]
#[rtype(result = "()")]
pub struct DeliverFrame(pub ServerFrame);

/// Close the socket with the given WS close code (§6.1, §5 graceful drain).
#[derive(Message)]
#[rtype(result = "()")]
pub struct ShutdownConnection(pub u16);

/// A socket has finished authenticating for `device_id` (§4.C step 1).
#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub device_id: DeviceId,
    pub addr: Addr<WsConnection>,
}

/// A socket is going away. `addr` is compared against the registry's
/// current entry so a superseded connection's own shutdown can't evict the
/// newer one that replaced it (§6.1 `ReplacedByNewerConnection`).
#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub device_id: DeviceId,
    pub addr: Addr<WsConnection>,
}

/// Forward a control frame to `device_id`'s socket on this replica, if any.
/// A no-op when the device is connected to a different replica — the
/// maintenance scheduler's nudges are best-effort (§4.H).
#[derive(Message)]
#[rtype(result = "()")]
pub struct NotifyDevice {
    pub device_id: DeviceId,
    pub frame: ServerFrame,
}

/// Close every connection on this replica with `4005` (§5 graceful shutdown).
#[derive(Message)]
#[rtype(result = "()")]
pub struct BroadcastShutdown;

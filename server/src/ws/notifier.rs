// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bridges the core crate's [`relay_core::scheduler::MaintenanceNotifier`]
//! to the websocket layer (§4.H). A nudge only reaches a device that
//! happens to hold a live socket on *this* replica; devices connected
//! elsewhere, or not connected at all, simply miss the nudge until the
//! scheduler's next period or their next reconnect picks up the same state
//! from a REST poll. This mirrors how `ConnectionDirectory::publish` only
//! delivers to an already-online device (§4.D) — nudges follow the same
//! best-effort contract as envelope fan-out.

use actix::Addr;
use async_trait::async_trait;
use relay_common::identifiers::DeviceId;
use relay_common::messages::ServerFrame;
use relay_core::scheduler::MaintenanceNotifier;

use super::messages::NotifyDevice;
use super::registry::ConnectionRegistry;

pub struct WsMaintenanceNotifier(pub Addr<ConnectionRegistry>);

#[async_trait]
impl MaintenanceNotifier for WsMaintenanceNotifier {
    async fn notify_prekey_low(&self, device_id: DeviceId) {
        self.0.do_send(NotifyDevice {
            device_id,
            frame: ServerFrame::PreKeyLow,
        });
    }

    async fn notify_rotate_signed_prekey(&self, device_id: DeviceId) {
        self.0.do_send(NotifyDevice {
            device_id,
            frame: ServerFrame::TokenExpiring,
        });
    }
}

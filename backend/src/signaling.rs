// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The Signaling Relay (§4.G): call setup (offer, answer, ICE candidates)
//! travels as ordinary envelopes through [`EnvelopeRouter`], tagged
//! `ciphertext_type=signaling`. The two behavioral differences from a
//! regular message — a 60-second offline TTL instead of the default, and
//! the VoIP push path instead of the normal one — are already conditioned
//! on that tag inside [`crate::queue::OfflineQueue`] and
//! [`crate::push::PushDispatcher`]; this module exists so callers never
//! have to thread the tag through by hand.

use relay_common::identifiers::{DeviceId, EnvelopeId, UserId};
use relay_common::messages::CiphertextType;

use crate::router::EnvelopeRouter;
use crate::router::errors::RouterError;

pub struct SignalingRelay<'a> {
    router: &'a EnvelopeRouter,
}

impl<'a> SignalingRelay<'a> {
    pub fn new(router: &'a EnvelopeRouter) -> Self {
        Self { router }
    }

    /// Sends a call-setup envelope (offer/answer/ICE candidate). A stale
    /// offer is worthless, so this always rides the signaling TTL/push path
    /// (§4.G) regardless of what the caller might otherwise pass.
    pub async fn send(
        &self,
        envelope_id: EnvelopeId,
        sender_user_id: UserId,
        sender_device_id: DeviceId,
        target_user_id: UserId,
        target_device: Option<DeviceId>,
        ciphertext: Vec<u8>,
    ) -> Result<(), RouterError> {
        self.router
            .ingest(
                envelope_id,
                sender_user_id,
                sender_device_id,
                target_user_id,
                target_device,
                CiphertextType::Signaling,
                ciphertext,
            )
            .await
    }
}

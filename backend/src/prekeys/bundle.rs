// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The pre-key bundle returned by `claim_bundle` (§4.B, GLOSSARY "Pre-key
//! bundle").

use relay_common::crypto::agreement::AgreementKeyBytes;
use relay_common::crypto::signatures::{SignatureBytes, VerifyingKeyBytes};
use relay_common::identifiers::DeviceId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKeyView {
    pub key_id: i32,
    pub pubkey: AgreementKeyBytes,
    pub signature: SignatureBytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimePreKeyView {
    pub key_id: i32,
    pub pubkey: AgreementKeyBytes,
}

/// One device's worth of handshake material (§4.B `claim_bundle` return
/// shape). `one_time_prekey` is `None` when the pool was empty at claim
/// time — the bundle is still usable, just with weaker forward secrecy
/// (§4.B edge cases).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceBundle {
    pub target_device_id: DeviceId,
    pub identity_key: VerifyingKeyBytes,
    pub signed_prekey: SignedPreKeyView,
    pub one_time_prekey: Option<OneTimePreKeyView>,
}

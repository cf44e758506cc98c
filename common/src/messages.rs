// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The envelope entity (§3.1) and the framed JSON protocol the persistent
//! transport speaks (§6.1, §4.C). The server only ever inspects the fields
//! declared here — `ciphertext` is opaque and is never parsed, normalized or
//! transformed (§9 "freeze the wire envelope at the server").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identifiers::{DeviceId, EnvelopeId, UserId};

/// §3.1 `Envelope.ciphertext_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum CiphertextType {
    PrekeyMessage,
    NormalMessage,
    Signaling,
    Receipt,
}

impl CiphertextType {
    /// Signaling envelopes use the VoIP/high-priority push path and a 60s
    /// offline TTL rather than the default 30-day one (§4.G).
    pub fn is_signaling(self) -> bool {
        matches!(self, CiphertextType::Signaling)
    }
}

/// The server-visible routing unit (§3.1, GLOSSARY). `ciphertext` is opaque
/// bytes; the server assigns `created_at` on ingest and never reads any
/// other field of the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub envelope_id: EnvelopeId,
    pub sender_user_id: UserId,
    pub sender_device_id: DeviceId,
    pub target_user_id: UserId,
    pub target_device_id: DeviceId,
    pub ciphertext_type: CiphertextType,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// `delivered` vs `read` (§4.C receipt frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    Delivered,
    Read,
}

/// Frames the client may send over the persistent transport (§4.C, §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        token: String,
        device_id: DeviceId,
    },
    Envelope {
        envelope_id: EnvelopeId,
        target_user: UserId,
        /// Absent when `target_user` is the sender's own user-id: the
        /// router then fans out to every other device of that user
        /// (multi-device sync, §4.D "self-send is allowed to other
        /// devices of the same user"). Present otherwise, naming exactly
        /// the device the per-device X3DH session was established with.
        #[serde(default)]
        target_device: Option<DeviceId>,
        ciphertext_type: CiphertextType,
        #[serde(with = "base64_bytes")]
        ciphertext: Vec<u8>,
    },
    Ack {
        envelope_id: EnvelopeId,
    },
    Pong,
    Typing,
    Presence,
    Receipt {
        envelope_id: EnvelopeId,
        kind: ReceiptKind,
    },
}

/// Frames the server may send over the persistent transport (§4.C, §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthOk,
    AuthError {
        reason: AuthErrorReason,
    },
    Envelope {
        envelope_id: EnvelopeId,
        sender_user: UserId,
        sender_device: DeviceId,
        ciphertext_type: CiphertextType,
        #[serde(with = "base64_bytes")]
        ciphertext: Vec<u8>,
    },
    Ping,
    PreKeyLow,
    TokenExpiring,
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorReason {
    InvalidToken,
    TokenExpired,
    DeviceMismatch,
}

/// WS close codes (§6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    AuthFailure = 4001,
    TokenExpired = 4002,
    RateLimited = 4003,
    ReplacedByNewerConnection = 4004,
    ServerShutdown = 4005,
}

pub mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_envelope_roundtrips_through_json() {
        let frame = ClientFrame::Envelope {
            envelope_id: EnvelopeId::random(),
            target_user: UserId::random(),
            target_device: Some(DeviceId::random()),
            ciphertext_type: CiphertextType::NormalMessage,
            ciphertext: vec![0xDE, 0xAD, 0xBE, 0xEF],
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: ClientFrame = serde_json::from_str(&json).unwrap();
        match back {
            ClientFrame::Envelope { ciphertext, .. } => {
                assert_eq!(ciphertext, vec![0xDE, 0xAD, 0xBE, 0xEF])
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn auth_frame_tag_is_type_field() {
        let frame = ClientFrame::Auth {
            token: "abc".into(),
            device_id: DeviceId::random(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "auth");
    }
}

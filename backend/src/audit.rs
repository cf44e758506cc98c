// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The append-only `audit_log` table (§6.3, §4.A "All verification failures
//! are logged to the audit log with kind and subject", §7 "Authentication
//! failures are audit-logged with source address, device-id attempted, and
//! reason"). Writes never fail the caller's operation — audit logging is a
//! side channel, not a transactional dependency (mirrors the teacher's
//! `tracing`-based audit events, persisted here because the spec calls out
//! a durable table rather than a log stream).

use relay_common::identifiers::{DeviceId, UserId};
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventKind {
    VerificationRequested,
    VerificationFailed,
    VerificationSucceeded,
    DeviceRegistered,
    TokenRefreshed,
    RefreshTokenReplayed,
    Logout,
    SignedPrekeySignatureInvalid,
}

impl AuditEventKind {
    fn as_str(self) -> &'static str {
        match self {
            AuditEventKind::VerificationRequested => "verification_requested",
            AuditEventKind::VerificationFailed => "verification_failed",
            AuditEventKind::VerificationSucceeded => "verification_succeeded",
            AuditEventKind::DeviceRegistered => "device_registered",
            AuditEventKind::TokenRefreshed => "token_refreshed",
            AuditEventKind::RefreshTokenReplayed => "refresh_token_replayed",
            AuditEventKind::Logout => "logout",
            AuditEventKind::SignedPrekeySignatureInvalid => "signed_prekey_signature_invalid",
        }
    }
}

/// Appends audit events. Backed by Postgres; a failed write is logged via
/// `tracing` but never propagated, since losing one audit row must not take
/// down the authentication path it is observing.
#[derive(Clone)]
pub struct AuditLog {
    pool: PgPool,
}

impl AuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        kind: AuditEventKind,
        subject_user_id: Option<UserId>,
        subject_device_id: Option<DeviceId>,
        source_address: Option<&str>,
        reason: Option<&str>,
    ) {
        let detail: Value = serde_json::json!({
            "source_address": source_address,
            "reason": reason,
        });
        let result = sqlx::query!(
            r#"INSERT INTO audit_log (kind, subject_user_id, subject_device_id, detail, occurred_at)
            VALUES ($1, $2, $3, $4, now())"#,
            kind.as_str(),
            subject_user_id.map(|id| id.as_uuid()),
            subject_device_id.map(|id| id.as_uuid()),
            detail,
        )
        .execute(&self.pool)
        .await;
        if let Err(error) = result {
            warn!(%error, kind = kind.as_str(), "failed to append audit log entry");
        }
    }
}

// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Small helpers around `chrono` timestamps used for token/prekey/envelope
//! expiry bookkeeping (§3.1).

use chrono::{DateTime, Duration, Utc};

/// A validity window with a fixed start and end, used for signed pre-keys,
/// session tokens and verification codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationData {
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl ExpirationData {
    pub fn new(lifetime: Duration) -> Self {
        let not_before = Utc::now();
        Self {
            not_before,
            not_after: not_before + lifetime,
        }
    }

    pub fn from_bounds(not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        Self {
            not_before,
            not_after,
        }
    }

    pub fn is_valid(&self) -> bool {
        let now = Utc::now();
        self.not_before <= now && now <= self.not_after
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn expires_within(&self, window: Duration) -> bool {
        self.not_after - Utc::now() <= window
    }
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

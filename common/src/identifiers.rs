// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! 128-bit identifiers for the entities in §3.1. All of them are thin,
//! `Copy`-able `Uuid` wrappers with a `sqlx::Type` derive so they serialize
//! to/from a `uuid` column without manual `Encode`/`Decode` impls.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(UserId, "A user, one record per verified phone number.");
uuid_id!(DeviceId, "A single app install belonging to a user.");
uuid_id!(
    EnvelopeId,
    "Client-generated idempotency key for a routed envelope. 128 bits, globally unique."
);

/// Platform tag for a device (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Web,
    Desktop,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Web => "web",
            Platform::Desktop => "desktop",
        };
        write!(f, "{s}")
    }
}

/// An E.164 phone number. Validated loosely: leading `+` and 8-15 digits.
/// Full E.164 validation is a client/SMS-provider concern; the server only
/// needs a stable, comparable key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct PhoneNumber(String);

#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum PhoneNumberError {
    #[error("phone number must be in E.164 format")]
    InvalidFormat,
}

impl PhoneNumber {
    pub fn parse(raw: &str) -> Result<Self, PhoneNumberError> {
        let digits = raw.strip_prefix('+').unwrap_or(raw);
        if !raw.starts_with('+')
            || digits.is_empty()
            || digits.len() > 15
            || digits.len() < 8
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(PhoneNumberError::InvalidFormat);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_number_roundtrip() {
        let phone = PhoneNumber::parse("+15551000001").unwrap();
        assert_eq!(phone.as_str(), "+15551000001");
    }

    #[test]
    fn phone_number_rejects_missing_plus() {
        assert!(PhoneNumber::parse("15551000001").is_err());
    }

    #[test]
    fn device_id_roundtrips_through_string() {
        let id = DeviceId::random();
        let parsed: DeviceId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}

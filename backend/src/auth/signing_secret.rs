// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The token-signing-secret pair (§4.A, §9 "singletons holding mutable
//! state"). Exposes only sign/verify; the secret bytes never leave this
//! module. Readers (token validation, every request) are frequent; writers
//! (rotation) run once per `signing_secret_rotation_interval` from the
//! maintenance scheduler (§4.H).

use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use relay_common::crypto::mac::SigningSecret;

/// Monotonic generation counter so a verified token can report which
/// secret generation signed it (§8 property 3).
pub type Generation = u64;

struct Secrets {
    current: SigningSecret,
    current_generation: Generation,
    /// `None` once retired by elapsed time, regardless of how many
    /// rotations have happened since (§4.A: the overlap is a fixed
    /// duration from installation, not a one-rotation grace period).
    previous: Option<(SigningSecret, DateTime<Utc>)>,
}

/// Holds the current and previous signing secrets behind a reader-writer
/// lock. `previous` verifies until `overlap` has elapsed since it was
/// superseded, independent of `signing_secret_rotation_interval` (§4.A
/// "Accepts tokens signed with... the previous signing secret within a
/// 24-hour overlap").
pub struct SigningSecretPair {
    inner: RwLock<Secrets>,
    overlap: Duration,
}

impl SigningSecretPair {
    pub fn new(initial: SigningSecret) -> Self {
        Self::with_overlap(initial, Duration::hours(24))
    }

    pub fn with_overlap(initial: SigningSecret, overlap: Duration) -> Self {
        Self {
            inner: RwLock::new(Secrets {
                current: initial,
                current_generation: 0,
                previous: None,
            }),
            overlap,
        }
    }

    /// Sign `message` with the current secret, returning the tag and the
    /// generation it was signed under.
    pub fn sign(&self, message: &[u8]) -> ([u8; 32], Generation) {
        let secrets = self.inner.read().expect("signing secret lock poisoned");
        (secrets.current.sign(message), secrets.current_generation)
    }

    /// Verify `message` against whichever of current/previous accepts it,
    /// treating `previous` as retired once it's been superseded for longer
    /// than `overlap`.
    pub fn verify(&self, message: &[u8], tag: &[u8; 32]) -> bool {
        let secrets = self.inner.read().expect("signing secret lock poisoned");
        if secrets.current.verify(message, tag).is_ok() {
            return true;
        }
        secrets.previous.as_ref().is_some_and(|(previous, retired_at)| {
            Utc::now() < *retired_at + self.overlap && previous.verify(message, tag).is_ok()
        })
    }

    /// Promote current → previous and install a freshly generated secret
    /// (§4.A rotation, §4.H "rotate token signing secret"). Records the
    /// moment `previous` was superseded so it retires by elapsed time.
    pub fn rotate(&self, new_secret: SigningSecret) {
        let mut secrets = self.inner.write().expect("signing secret lock poisoned");
        let superseded = std::mem::replace(&mut secrets.current, new_secret);
        secrets.previous = Some((superseded, Utc::now()));
        secrets.current_generation += 1;
    }

    pub fn current_generation(&self) -> Generation {
        self.inner.read().expect("signing secret lock poisoned").current_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_under_current_secret() {
        let pair = SigningSecretPair::new(SigningSecret::generate());
        let (tag, _) = pair.sign(b"payload");
        assert!(pair.verify(b"payload", &tag));
    }

    #[test]
    fn verifies_under_previous_secret_within_overlap() {
        let pair = SigningSecretPair::new(SigningSecret::generate());
        let (old_tag, _) = pair.sign(b"payload");
        pair.rotate(SigningSecret::generate());
        assert!(pair.verify(b"payload", &old_tag));
    }

    #[test]
    fn rejects_previous_once_the_overlap_has_elapsed() {
        let pair = SigningSecretPair::with_overlap(SigningSecret::generate(), Duration::milliseconds(10));
        let (old_tag, _) = pair.sign(b"payload");
        pair.rotate(SigningSecret::generate());
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(!pair.verify(b"payload", &old_tag));
    }
}

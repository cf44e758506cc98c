// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The Pre-Key Directory (§4.B): identity keys, signed pre-keys, and the
//! one-time pre-key pool that backs the X3DH handshake.

pub mod bundle;
pub mod errors;
pub mod one_time_prekey;
pub mod signed_prekey;

use relay_common::crypto::agreement::AgreementKeyBytes;
use relay_common::crypto::signatures::{SignatureBytes, VerifyingKeyBytes};
use relay_common::identifiers::{DeviceId, UserId};
use relay_common::ONE_TIME_PREKEY_LOW_WATERMARK;
use sqlx::PgPool;
use tracing::{error, instrument};

use crate::auth::device_record::DeviceRecord;
use crate::auth::user_record::UserRecord;

use self::bundle::{DeviceBundle, OneTimePreKeyView, SignedPreKeyView};
use self::errors::PreKeyError;
use self::one_time_prekey::OneTimePreKey;
use self::signed_prekey::SignedPreKeyRecord;

/// Upload payload for `publish_identity` (§4.B).
pub struct PublishRequest {
    pub device_id: DeviceId,
    /// The user's long-term identity key (§3.1). Carried on every publish
    /// call rather than a separate endpoint; only the first call for a user
    /// actually changes the stored value (§4.A places a placeholder there
    /// at verification time).
    pub identity_key: VerifyingKeyBytes,
    pub signed_prekey_id: i32,
    pub signed_prekey_pubkey: AgreementKeyBytes,
    pub signed_prekey_signature: SignatureBytes,
    pub one_time_prekeys: Vec<(i32, AgreementKeyBytes)>,
}

pub struct PreKeyDirectory {
    pool: PgPool,
}

impl PreKeyDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `publish_identity` (§4.B): validates the signature eagerly, then
    /// atomically replaces the current signed pre-key and appends one-time
    /// pre-keys.
    #[instrument(skip(self, request), err)]
    pub async fn publish_identity(&self, request: PublishRequest) -> Result<(), PreKeyError> {
        let device = DeviceRecord::load(&self.pool, request.device_id)
            .await?
            .ok_or(PreKeyError::TargetUnreachable)?;
        let user = UserRecord::load_by_id(&self.pool, device.user_id)
            .await?
            .ok_or(PreKeyError::TargetUnreachable)?;

        let candidate = SignedPreKeyRecord::new(
            request.device_id,
            request.signed_prekey_id,
            request.signed_prekey_pubkey,
            request.signed_prekey_signature,
        );
        if !candidate.verify_signature(&request.identity_key) {
            return Err(PreKeyError::SignatureInvalid);
        }

        let mut tx = self.pool.begin().await.map_err(crate::errors::StorageError::from)?;
        if user.identity_pubkey != request.identity_key {
            UserRecord::set_identity_pubkey(&mut *tx, user.user_id, request.identity_key).await?;
        }
        if let Some(current) = SignedPreKeyRecord::load_current(&mut *tx, request.device_id).await? {
            SignedPreKeyRecord::mark_replaced(&mut *tx, request.device_id, current.key_id).await?;
        }
        candidate.store(&mut *tx).await?;
        OneTimePreKey::store_batch(&mut *tx, request.device_id, &request.one_time_prekeys).await?;
        tx.commit().await.map_err(crate::errors::StorageError::from)?;
        Ok(())
    }

    /// `replenish` (§4.B): appends one-time pre-keys without touching the
    /// signed pre-key.
    pub async fn replenish(
        &self,
        device_id: DeviceId,
        one_time_prekeys: Vec<(i32, AgreementKeyBytes)>,
    ) -> Result<(), PreKeyError> {
        OneTimePreKey::store_batch(&self.pool, device_id, &one_time_prekeys).await?;
        Ok(())
    }

    /// `claim_bundle` (§4.B): one bundle per active device of
    /// `target_user_id`, skipping devices with no signed pre-key (§4.B
    /// edge cases). Returns an empty vec if the user has no active
    /// devices; the caller surfaces that as "recipient not reachable".
    #[instrument(skip(self), err)]
    pub async fn claim_bundle(&self, target_user_id: UserId) -> Result<Vec<DeviceBundle>, PreKeyError> {
        let user = UserRecord::load_by_id(&self.pool, target_user_id)
            .await?
            .ok_or(PreKeyError::TargetUnreachable)?;
        let devices = DeviceRecord::load_for_user(&self.pool, target_user_id).await?;

        let mut bundles = Vec::with_capacity(devices.len());
        for device in devices {
            match self.claim_for_device(&device, &user.identity_pubkey).await {
                Ok(Some(bundle)) => bundles.push(bundle),
                Ok(None) => {
                    // No signed pre-key published yet for this device; skip
                    // it, the bundle is per-device (§4.B edge cases).
                }
                Err(PreKeyError::SignatureInvalid) => {
                    // §4.B step 3 / §9 open question: refuse and report,
                    // never synthesize a bundle from an unverifiable key.
                    error!(device_id = %device.device_id, "signed pre-key signature no longer verifies, refusing bundle for device");
                }
                Err(other) => return Err(other),
            }
        }
        Ok(bundles)
    }

    async fn claim_for_device(
        &self,
        device: &DeviceRecord,
        identity_key: &VerifyingKeyBytes,
    ) -> Result<Option<DeviceBundle>, PreKeyError> {
        let mut tx = self.pool.begin().await.map_err(crate::errors::StorageError::from)?;
        let Some(signed) = SignedPreKeyRecord::load_current(&mut *tx, device.device_id).await? else {
            tx.commit().await.map_err(crate::errors::StorageError::from)?;
            return Ok(None);
        };
        if !signed.verify_signature(identity_key) {
            tx.rollback().await.map_err(crate::errors::StorageError::from)?;
            return Err(PreKeyError::SignatureInvalid);
        }
        let one_time = OneTimePreKey::claim_one(&mut *tx, device.device_id).await?;
        tx.commit().await.map_err(crate::errors::StorageError::from)?;

        Ok(Some(DeviceBundle {
            target_device_id: device.device_id,
            identity_key: *identity_key,
            signed_prekey: SignedPreKeyView {
                key_id: signed.key_id,
                pubkey: signed.pubkey,
                signature: signed.signature,
            },
            one_time_prekey: one_time.map(|otk| OneTimePreKeyView {
                key_id: otk.key_id,
                pubkey: otk.pubkey,
            }),
        }))
    }

    /// §4.B "server publishes a 'low pool' event... when count < 10":
    /// devices whose pool has dropped below the watermark.
    pub async fn devices_below_watermark(&self) -> Result<Vec<DeviceId>, PreKeyError> {
        Ok(OneTimePreKey::load_device_ids_below(&self.pool, ONE_TIME_PREKEY_LOW_WATERMARK as i64).await?)
    }

    /// User lookup by phone (§6.2 `/users/search`): the first step of
    /// starting a handshake with someone, before a bundle can be claimed.
    pub async fn resolve_user_by_phone(
        &self,
        phone: &relay_common::identifiers::PhoneNumber,
    ) -> Result<Option<(UserId, VerifyingKeyBytes)>, PreKeyError> {
        let user = UserRecord::load_by_phone(&self.pool, phone).await?;
        Ok(user.map(|user| (user.user_id, user.identity_pubkey)))
    }
}

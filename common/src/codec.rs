// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Blob (de)serialization for columns that store an opaque serialized value
//! (e.g. a `QueueMessage`'s wire bytes). The wire format here is JSON, since
//! the client transport itself is framed JSON (§6.1) and there is no benefit
//! in introducing a second, binary codec for the handful of blob columns.

use serde::{Serialize, de::DeserializeOwned};
use sqlx::{Decode, Encode, Postgres, Type, encode::IsNull, error::BoxDynError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Wraps a value for encoding into a `bytea`/`jsonb` column on the way in.
pub struct BlobEncoded<T>(pub T);

impl<T> Type<Postgres> for BlobEncoded<T> {
    fn type_info() -> <Postgres as sqlx::Database>::TypeInfo {
        <Vec<u8> as Type<Postgres>>::type_info()
    }
}

impl<'q, T> Encode<'q, Postgres> for BlobEncoded<T>
where
    T: Serialize,
{
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as sqlx::Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, BoxDynError> {
        let bytes = serde_json::to_vec(&self.0)?;
        Encode::<Postgres>::encode(bytes, buf)
    }
}

/// Unwraps a value decoded from a `bytea`/`jsonb` column on the way out.
pub struct BlobDecoded<T>(pub T);

impl<T> BlobDecoded<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Type<Postgres> for BlobDecoded<T> {
    fn type_info() -> <Postgres as sqlx::Database>::TypeInfo {
        <Vec<u8> as Type<Postgres>>::type_info()
    }
}

impl<'r, T> Decode<'r, Postgres> for BlobDecoded<T>
where
    T: DeserializeOwned,
{
    fn decode(value: <Postgres as sqlx::Database>::ValueRef<'r>) -> Result<Self, BoxDynError> {
        let bytes = <Vec<u8> as Decode<Postgres>>::decode(value)?;
        let decoded = serde_json::from_slice(&bytes)?;
        Ok(BlobDecoded(decoded))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
        b: String,
    }
    use serde::Serialize;

    #[test]
    fn json_roundtrip() {
        let sample = Sample {
            a: 1,
            b: "hi".into(),
        };
        let bytes = serde_json::to_vec(&sample).unwrap();
        let back: Sample = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(sample, back);
    }
}

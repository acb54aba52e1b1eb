//! Blob Codec
//!
//! Versioned binary encoding for the files of the disk tier.
//!
//! Layout: `TTLC` magic, one format version byte, one blob kind byte, then
//! the bincode payload. Anything that does not match is rejected instead of
//! being decoded into garbage.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::cache::Expiry;

const MAGIC: [u8; 4] = *b"TTLC";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 2;

// == Blob Kind ==
/// What a blob file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Value = 0,
    Key = 1,
    Expiry = 2,
}

impl BlobKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(BlobKind::Value),
            1 => Some(BlobKind::Key),
            2 => Some(BlobKind::Expiry),
            _ => None,
        }
    }
}

// == Codec Error ==
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("blob is too short to carry a header")]
    Truncated,

    #[error("blob does not start with the cache magic")]
    BadMagic,

    #[error("unsupported blob format version {0}")]
    UnsupportedVersion(u8),

    #[error("expected a {expected:?} blob, found kind byte {found}")]
    KindMismatch { expected: BlobKind, found: u8 },

    #[error("payload error: {0}")]
    Payload(#[from] bincode::Error),
}

// == Encode / Decode ==
/// Encodes `item` as a blob of the given kind.
pub fn encode<T: Serialize + ?Sized>(kind: BlobKind, item: &T) -> Result<Vec<u8>, CodecError> {
    let payload = bincode::serialize(item)?;
    let mut blob = Vec::with_capacity(HEADER_LEN + payload.len());
    blob.extend_from_slice(&MAGIC);
    blob.push(FORMAT_VERSION);
    blob.push(kind as u8);
    blob.extend_from_slice(&payload);
    Ok(blob)
}

/// Decodes a blob, validating its header against `kind`.
pub fn decode<T: DeserializeOwned>(kind: BlobKind, blob: &[u8]) -> Result<T, CodecError> {
    if blob.len() < HEADER_LEN {
        return Err(CodecError::Truncated);
    }
    if blob[..MAGIC.len()] != MAGIC {
        return Err(CodecError::BadMagic);
    }

    let version = blob[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let found = blob[MAGIC.len() + 1];
    if BlobKind::from_byte(found) != Some(kind) {
        return Err(CodecError::KindMismatch {
            expected: kind,
            found,
        });
    }

    Ok(bincode::deserialize(&blob[HEADER_LEN..])?)
}

pub fn encode_expiry(expiry: Expiry) -> Result<Vec<u8>, CodecError> {
    encode(BlobKind::Expiry, &expiry.as_millis())
}

pub fn decode_expiry(blob: &[u8]) -> Result<Expiry, CodecError> {
    decode::<i64>(BlobKind::Expiry, blob).map(Expiry::from_millis)
}

//! Versioned binary framing for persisted records
//!
//! Layout: one format-version byte, a little-endian u32 body length, then the
//! bincode-encoded body. Any mismatch (unknown version, truncated or oversized
//! buffer, malformed body) surfaces as `TableError::Decode`.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{TableError, TableResult};

/// Current on-disk format version.
pub const FORMAT_VERSION: u8 = 1;

/// Frame header size: version byte plus body length.
const FRAME_HEADER_LEN: usize = 1 + 4;

/// Encode `value` into a version-tagged, length-prefixed frame.
pub fn encode<T: Serialize>(what: &'static str, value: &T) -> TableResult<Bytes> {
    let body = bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
        TableError::Decode {
            what,
            reason: format!("encode: {e}"),
        }
    })?;

    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    buf.push(FORMAT_VERSION);
    buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(Bytes::from(buf))
}

/// Decode a frame produced by [`encode`].
pub fn decode<T: DeserializeOwned>(what: &'static str, buf: &[u8]) -> TableResult<T> {
    if buf.len() < FRAME_HEADER_LEN {
        return Err(TableError::Decode {
            what,
            reason: format!("buffer too short: {} bytes", buf.len()),
        });
    }

    let version = buf[0];
    if version != FORMAT_VERSION {
        return Err(TableError::Decode {
            what,
            reason: format!("unknown format version {version}"),
        });
    }

    let len = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    let body = &buf[FRAME_HEADER_LEN..];
    if body.len() != len {
        return Err(TableError::Decode {
            what,
            reason: format!("body length mismatch: header says {len}, got {}", body.len()),
        });
    }

    let (value, consumed) = bincode::serde::decode_from_slice(body, bincode::config::standard())
        .map_err(|e| TableError::Decode {
            what,
            reason: e.to_string(),
        })?;
    if consumed != len {
        return Err(TableError::Decode {
            what,
            reason: format!("trailing bytes: consumed {consumed} of {len}"),
        });
    }

    Ok(value)
}

//! Payload and wire encoding.
//!
//! Queue payloads are JSON. Lists of raw payloads travel as length-prefixed
//! frames: a `u32` big-endian length followed by that many bytes, repeated.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors from encoding or decoding payloads and frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload is not valid JSON for the expected type.
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame header promised more bytes than are left.
    #[error("Truncated frame at offset {offset}: need {needed} bytes, {available} left")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A single payload is too large for a `u32` length prefix.
    #[error("Payload of {0} bytes does not fit in a frame")]
    Oversized(usize),
}

/// Encode a value as a JSON payload.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode a JSON payload.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Concatenate payloads into length-prefixed frames.
pub fn encode_frames(items: &[Vec<u8>]) -> Result<Vec<u8>, CodecError> {
    let total = items.iter().map(|i| i.len() + 4).sum();
    let mut out = Vec::with_capacity(total);
    for item in items {
        let len = u32::try_from(item.len()).map_err(|_| CodecError::Oversized(item.len()))?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(item);
    }
    Ok(out)
}

/// Split length-prefixed frames back into payloads.
pub fn decode_frames(bytes: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
    let mut items = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        let Some(header) = rest.get(..4) else {
            return Err(CodecError::Truncated {
                offset,
                needed: 4,
                available: rest.len(),
            });
        };
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let Some(payload) = rest[4..].get(..len) else {
            return Err(CodecError::Truncated {
                offset: offset + 4,
                needed: len,
                available: rest.len() - 4,
            });
        };
        items.push(payload.to_vec());
        offset += 4 + len;
    }

    Ok(items)
}

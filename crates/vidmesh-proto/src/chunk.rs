//! Chunk payload codec.
//!
//! Media chunks travel over the push channel as base64 text so they can ride
//! inside SSE message frames.  Decoding is pure and stateless; a malformed
//! payload affects that chunk only.

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use thiserror::Error;

/// Malformed chunk payload.  The chunk is dropped and the stream continues.
#[derive(Debug, Error)]
#[error("malformed chunk payload: {0}")]
pub struct DecodeError(#[from] base64::DecodeError);

/// Decode one wire-format chunk payload into raw media bytes.
pub fn decode_chunk(payload: &str) -> Result<Bytes, DecodeError> {
    let raw = STANDARD.decode(payload.trim())?;
    Ok(Bytes::from(raw))
}

/// Encode raw media bytes as a wire payload.  The server side of the chunk
/// channel; kept here for fixtures and loopback tests.
pub fn encode_chunk(data: &[u8]) -> String {
    STANDARD.encode(data)
}

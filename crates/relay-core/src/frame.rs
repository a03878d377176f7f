//! Wire framing for broadcast frames and stored bodies.
//!
//! Frame layout, little-endian:
//!
//! | offset | bytes | field   |
//! |--------|-------|---------|
//! | 0      | 8     | version |
//! | 8      | 8     | time    |
//! | 16     | N     | payload |
//!
//! The durable store keeps bytes `8..` of the frame keyed by version.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::BaseMessage;

/// Size of the version + time header of a broadcast frame.
pub const FRAME_HEADER_LEN: usize = 16;

/// Size of the time header of a stored body.
pub const BODY_HEADER_LEN: usize = 8;

/// Framing error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: {len} bytes")]
    TooShort { len: usize },
}

/// Encode a broadcast frame.
#[must_use]
pub fn encode_frame(version: u64, time: i64, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + data.len());
    buf.put_u64_le(version);
    buf.put_i64_le(time);
    buf.put_slice(data);
    buf.freeze()
}

/// Decode a broadcast frame.
///
/// # Errors
/// Returns `FrameError::TooShort` if the frame cannot hold a header.
pub fn decode_frame(frame: &Bytes) -> Result<BaseMessage, FrameError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(FrameError::TooShort { len: frame.len() });
    }
    let version = read_u64(&frame[0..8]);
    decode_body(version, &frame.slice(8..))
}

/// The stored body of a frame (time + payload).
#[must_use]
pub fn body_of(frame: &Bytes) -> Bytes {
    frame.slice(8.min(frame.len())..)
}

/// Decode a stored body into a message with the given version.
///
/// # Errors
/// Returns `FrameError::TooShort` if the body cannot hold a timestamp.
pub fn decode_body(version: u64, body: &Bytes) -> Result<BaseMessage, FrameError> {
    if body.len() < BODY_HEADER_LEN {
        return Err(FrameError::TooShort { len: body.len() });
    }
    #[allow(clippy::cast_possible_wrap)]
    let time = read_u64(&body[0..8]) as i64;
    Ok(BaseMessage {
        version,
        time,
        data: body.slice(BODY_HEADER_LEN..),
    })
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

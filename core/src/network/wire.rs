//! Shared wire framing for protocol messages
//!
//! ```text
//! [type: u8][len: u32 BE][payload: len bytes]
//! ```
//!
//! Payloads are postcard-encoded.

use serde::{de::DeserializeOwned, Serialize};

/// Frame header size in bytes: 1 byte type + 4 byte length
pub const FRAME_HEADER_LEN: usize = 5;

/// Largest payload accepted from the wire (64 MiB)
pub const MAX_FRAME_PAYLOAD: usize = 64 * 1024 * 1024;

/// Parsed frame view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Message type byte
    pub msg_type: u8,
    pub payload: &'a [u8],
    /// Header + payload
    pub total_size: usize,
}

/// Errors when decoding a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short")]
    TooShort,
    #[error("trailing bytes after frame")]
    TrailingBytes,
    #[error("frame payload of {0} bytes exceeds limit")]
    TooLarge(usize),
}

/// Errors when encoding or decoding a framed message
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("unknown message type: {0:#04x}")]
    UnknownType(u8),
    #[error("message type {declared:#04x} does not match body {actual:#04x}")]
    TypeMismatch { declared: u8, actual: u8 },
    #[error("payload codec error: {0}")]
    Codec(#[from] postcard::Error),
}

/// Encode a framed message as `[type][len][payload]`
pub fn encode_frame(msg_type: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(FrameError::TooLarge(payload.len()));
    }
    let mut bytes = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    bytes.push(msg_type);
    bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Decode a frame from the front of `bytes`
pub fn decode_frame(bytes: &[u8]) -> Result<Frame<'_>, FrameError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(FrameError::TooShort);
    }

    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    if len > MAX_FRAME_PAYLOAD {
        return Err(FrameError::TooLarge(len));
    }
    let total_size = FRAME_HEADER_LEN + len;
    if bytes.len() < total_size {
        return Err(FrameError::TooShort);
    }

    Ok(Frame {
        msg_type: bytes[0],
        payload: &bytes[FRAME_HEADER_LEN..total_size],
        total_size,
    })
}

/// Decode a frame and require that it consumes the full buffer
pub fn decode_frame_exact(bytes: &[u8]) -> Result<Frame<'_>, FrameError> {
    let frame = decode_frame(bytes)?;
    if frame.total_size != bytes.len() {
        return Err(FrameError::TrailingBytes);
    }
    Ok(frame)
}

/// Serialize `value` with postcard and frame it
pub fn encode_message<T: Serialize>(msg_type: u8, value: &T) -> Result<Vec<u8>, WireError> {
    let payload = postcard::to_allocvec(value)?;
    Ok(encode_frame(msg_type, &payload)?)
}

/// Deserialize a frame payload
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, WireError> {
    Ok(postcard::from_bytes(payload)?)
}

//! Length-prefixed frame codec.
//!
//! The wire unit is a 4-byte big-endian unsigned length followed by exactly
//! that many payload bytes. A zero length is a keep-alive: it is received at
//! the wire but carries no payload and is never dispatched to a handler.
//!
//! This crate is sans-IO: it only encodes into and decodes out of byte
//! buffers. The async reader that feeds the decoder lives in `hawser-stream`.

use bytes::{Buf, Bytes, BytesMut};

/// Size of the length prefix on the wire.
pub const HEADER_SIZE: usize = 4;

/// Default cap on a single frame's payload (16 MiB).
///
/// The cap is carried as a `u32`, so a configured value can never reach 2³².
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// One decoded wire unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Zero-length frame. Resets the peer's read deadline, nothing else.
    KeepAlive,
    /// A non-empty payload.
    Payload(Bytes),
}

/// Error from the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The announced length exceeds the configured cap.
    TooLarge {
        /// Length announced by the header (or requested by the encoder).
        len: u32,
        /// The cap it exceeded.
        max: u32,
    },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::TooLarge { len, max } => {
                write!(f, "frame of {len} bytes exceeds maximum of {max}")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Encode a payload as one contiguous buffer: header followed by payload.
///
/// Contiguous rather than gathered so a single `write_all` on the
/// connection's writer keeps framing atomic between writers sharing a
/// stream. Rejects payloads longer than `max_frame_size`.
pub fn encode(payload: &[u8], max_frame_size: u32) -> Result<Vec<u8>, FrameError> {
    if payload.len() > max_frame_size as usize {
        return Err(FrameError::TooLarge {
            len: u32::try_from(payload.len()).unwrap_or(u32::MAX),
            max: max_frame_size,
        });
    }
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Parse a big-endian length header.
///
/// No range check here; the caller validates against its configured cap.
pub fn decode_length(header: [u8; HEADER_SIZE]) -> u32 {
    u32::from_be_bytes(header)
}

/// Try to extract one complete frame from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame.
/// An oversized length is detected from the header alone, before any payload
/// bytes exist; the header is consumed so the caller can fail the connection
/// without re-reading it.
pub fn try_decode(buf: &mut BytesMut, max_frame_size: u32) -> Result<Option<Frame>, FrameError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }
    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&buf[..HEADER_SIZE]);
    let len = decode_length(header);

    if len == 0 {
        buf.advance(HEADER_SIZE);
        return Ok(Some(Frame::KeepAlive));
    }
    if len > max_frame_size {
        buf.advance(HEADER_SIZE);
        return Err(FrameError::TooLarge {
            len,
            max: max_frame_size,
        });
    }
    if buf.len() < HEADER_SIZE + len as usize {
        return Ok(None);
    }

    buf.advance(HEADER_SIZE);
    let payload = buf.split_to(len as usize).freeze();
    Ok(Some(Frame::Payload(payload)))
}

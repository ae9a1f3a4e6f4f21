//! Async length-prefixed framing over any byte stream.
//!
//! Wraps an `AsyncRead` source with the `hawser-frame` codec: inbound bytes
//! accumulate in an internal buffer and complete frames are peeled off the
//! front. Works with `TcpStream` halves, Unix sockets, or any other async
//! byte stream.

use std::io;

use bytes::BytesMut;
use hawser_frame::{self as frame, Frame, FrameError, HEADER_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 4096;

/// Outcome of waiting for one frame.
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete frame (keep-alive or payload).
    Frame(Frame),
    /// The stream ended at a frame boundary or inside the 4-byte header:
    /// the peer left cleanly.
    PeerClosed,
}

/// Error from [`LengthFramed::read_frame`].
#[derive(Debug)]
pub enum FramedReadError {
    /// The announced length exceeded the cap; the payload was never read.
    TooLarge { len: u32, max: u32 },
    /// The stream failed (or hit EOF) after a complete header, mid-payload.
    Read(io::Error),
}

impl std::fmt::Display for FramedReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramedReadError::TooLarge { len, max } => {
                write!(f, "frame of {len} bytes exceeds maximum of {max}")
            }
            FramedReadError::Read(e) => write!(f, "read failed mid-frame: {e}"),
        }
    }
}

impl std::error::Error for FramedReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FramedReadError::Read(e) => Some(e),
            FramedReadError::TooLarge { .. } => None,
        }
    }
}

/// A length-framed read side over an async byte stream.
pub struct LengthFramed<S> {
    stream: S,
    buf: BytesMut,
    max_frame_size: u32,
}

impl<S> LengthFramed<S> {
    pub fn new(stream: S, max_frame_size: u32) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK),
            max_frame_size,
        }
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Consume the wrapper and return the underlying stream. Buffered bytes
    /// are discarded.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> LengthFramed<S>
where
    S: AsyncRead + Unpin,
{
    /// Wait for the next complete frame.
    ///
    /// Cancellation safe: partially received bytes stay in the internal
    /// buffer, so dropping the returned future between chunks loses nothing.
    /// That is what lets a session `select!` over it.
    pub async fn read_frame(&mut self) -> Result<ReadOutcome, FramedReadError> {
        loop {
            match frame::try_decode(&mut self.buf, self.max_frame_size) {
                Ok(Some(f)) => return Ok(ReadOutcome::Frame(f)),
                Ok(None) => {}
                Err(FrameError::TooLarge { len, max }) => {
                    return Err(FramedReadError::TooLarge { len, max });
                }
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = match self.stream.read(&mut chunk).await {
                Ok(n) => n,
                Err(err) => {
                    // A complete header means we are mid-frame; anything
                    // earlier counts as the peer departing.
                    if self.buf.len() >= HEADER_SIZE {
                        return Err(FramedReadError::Read(err));
                    }
                    return Ok(ReadOutcome::PeerClosed);
                }
            };
            if n == 0 {
                if self.buf.len() >= HEADER_SIZE {
                    return Err(FramedReadError::Read(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("eof with {} buffered bytes mid-frame", self.buf.len()),
                    )));
                }
                return Ok(ReadOutcome::PeerClosed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

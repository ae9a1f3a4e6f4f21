//! Error values surfaced to `on_error` and used on internal boundaries.

use std::io;

use hawser_frame::FrameError;

/// Failure value returned by a user handler.
///
/// The session catches it at its perimeter and routes it through `on_error`;
/// it never propagates past the session boundary.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Error kinds surfaced by the transport core.
#[derive(Debug)]
pub enum TransportError {
    /// A frame announced a length beyond the configured cap. Fatal for the
    /// session; the payload is never read.
    FrameTooLarge {
        /// Length announced by the header.
        len: u32,
        /// The configured cap.
        max: u32,
    },
    /// The payload read failed mid-frame. Fatal for the session.
    Read(io::Error),
    /// The read deadline expired before a frame completed.
    Timeout,
    /// Client resolve produced no usable endpoint. Reported with no
    /// connection attached; the supervisor backs off.
    HostNotResolved(io::Error),
    /// Client connect failed for every resolved endpoint. Reported with no
    /// connection attached; the supervisor backs off.
    ServiceNotFound(io::Error),
    /// Cooperative cancellation observed mid-session.
    Cancelled,
    /// An outbound write failed. The session continues; a broken socket
    /// surfaces on the next read.
    Write(io::Error),
    /// A user handler returned an error.
    Handler(HandlerError),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::FrameTooLarge { len, max } => {
                write!(f, "frame of {len} bytes exceeds maximum of {max}")
            }
            TransportError::Read(e) => write!(f, "read failed mid-frame: {e}"),
            TransportError::Timeout => write!(f, "read deadline expired"),
            TransportError::HostNotResolved(e) => write!(f, "host resolution failed: {e}"),
            TransportError::ServiceNotFound(e) => write!(f, "connect failed: {e}"),
            TransportError::Cancelled => write!(f, "connection cancelled"),
            TransportError::Write(e) => write!(f, "write failed: {e}"),
            TransportError::Handler(e) => write!(f, "handler failed: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Read(e)
            | TransportError::HostNotResolved(e)
            | TransportError::ServiceNotFound(e)
            | TransportError::Write(e) => Some(e),
            TransportError::Handler(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<FrameError> for TransportError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::TooLarge { len, max } => TransportError::FrameTooLarge { len, max },
        }
    }
}

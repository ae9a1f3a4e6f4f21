//! Framed TCP endpoint runtime.
//!
//! A symmetric server/client runtime over 4-byte big-endian length-prefix
//! framing. A [`Service`] owns the set of live [`Connection`]s for one
//! endpoint; each connection is driven by its own session task that reads
//! frames, dispatches the consumer's [`Handlers`], and serializes writes.
//! Client-role services keep `scale` parallel connections alive through a
//! supervisor with exponential backoff and jitter. A tree of
//! [`CancelScope`]s unwinds the whole fleet cooperatively.
//!
//! ```no_run
//! use hawser_stream::{Handlers, Role, Service};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handlers = Handlers::new().with_on_read(|_service, conn, payload| async move {
//!         conn.write(payload); // echo
//!         Ok(())
//!     });
//!     let service = Service::bind(Role::Server, "0.0.0.0", 9000, handlers);
//!     // ... later:
//!     service.stop_clients();
//! }
//! ```

pub mod cancel;
mod client;
mod connection;
mod errors;
pub mod framing;
mod handlers;
mod listener;
mod service;
mod session;

pub use cancel::CancelScope;
pub use client::RetryPolicy;
pub use connection::{Connection, ConnectionId};
pub use errors::{HandlerError, TransportError};
pub use framing::{FramedReadError, LengthFramed, ReadOutcome};
pub use handlers::{ErrorHandler, Handlers, LifecycleHandler, ReadHandler};
pub use service::{EndpointConfig, Role, Service, ServiceId};

pub use hawser_frame::{Frame, FrameError, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE};

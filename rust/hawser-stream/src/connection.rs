//! Per-connection handle.
//!
//! A [`Connection`] is the consumer-facing view of one established stream.
//! The socket itself is owned by the connection's session task, which
//! serializes all I/O and handler calls; the handle only carries the write
//! mailbox, the identity, and the close claim.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cancel::CancelScope;
use crate::service::Service;

/// Process-unique connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One established bidirectional stream.
pub struct Connection {
    id: ConnectionId,
    service: Weak<Service>,
    write_tx: mpsc::UnboundedSender<Bytes>,
    cancel: CancelScope,
    // The close claim: whoever swaps this first owns the terminal callback
    // sequence, which is what makes `on_disconnected` exactly-once.
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        service: &Arc<Service>,
        write_tx: mpsc::UnboundedSender<Bytes>,
        cancel: CancelScope,
    ) -> Self {
        Self {
            id,
            service: Arc::downgrade(service),
            write_tx,
            cancel,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The owning service, while it is still alive.
    pub fn service(&self) -> Option<Arc<Service>> {
        self.service.upgrade()
    }

    /// Queue one payload for transmission. Fire-and-forget: the session
    /// frames and flushes it in submission order and then fires `on_write`;
    /// asynchronous failures are routed through `on_error`. Payloads queued
    /// after the connection closed are dropped.
    pub fn write(&self, payload: impl Into<Bytes>) {
        let _ = self.write_tx.send(payload.into());
    }

    pub(crate) fn cancel_scope(&self) -> &CancelScope {
        &self.cancel
    }

    /// Claim the closing sequence. True exactly once per connection.
    pub(crate) fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

//! The callback surface between the transport and its consumer.
//!
//! A [`Handlers`] bundle is attached at [`Service`](crate::Service)
//! construction and is read-only afterwards. Every callback is optional and
//! async; a callback that returns `Err` is caught at the session perimeter
//! and routed through `on_error`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::connection::Connection;
use crate::errors::{HandlerError, TransportError};
use crate::service::Service;

type BoxFut = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'static>>;

/// Connection lifecycle callback (`on_connect`, `on_accepted`, `on_write`,
/// `on_disconnected`).
pub type LifecycleHandler = Arc<dyn Fn(Arc<Service>, Arc<Connection>) -> BoxFut + Send + Sync>;

/// Inbound payload callback. Invoked once per non-empty frame, in arrival
/// order. The handler may call [`Connection::write`].
pub type ReadHandler = Arc<dyn Fn(Arc<Service>, Arc<Connection>, Bytes) -> BoxFut + Send + Sync>;

/// Error callback. The connection is `None` for resolve/connect failures
/// where no connection exists yet.
pub type ErrorHandler =
    Arc<dyn Fn(Arc<Service>, Option<Arc<Connection>>, TransportError) -> BoxFut + Send + Sync>;

/// Immutable bundle of optional endpoint callbacks.
#[derive(Clone, Default)]
pub struct Handlers {
    on_connect: Option<LifecycleHandler>,
    on_accepted: Option<LifecycleHandler>,
    on_read: Option<ReadHandler>,
    on_write: Option<LifecycleHandler>,
    on_disconnected: Option<LifecycleHandler>,
    on_error: Option<ErrorHandler>,
}

impl Handlers {
    /// An empty bundle: every event is a no-op.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per connection after it is established, before the first
    /// read. On the server it precedes `on_accepted`.
    pub fn with_on_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Service>, Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.on_connect = Some(Arc::new(move |s, c| Box::pin(f(s, c))));
        self
    }

    /// Called once per connection, after `on_connect` and before the first
    /// read.
    pub fn with_on_accepted<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Service>, Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.on_accepted = Some(Arc::new(move |s, c| Box::pin(f(s, c))));
        self
    }

    /// Called once per non-empty inbound frame, in arrival order.
    pub fn with_on_read<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Service>, Arc<Connection>, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.on_read = Some(Arc::new(move |s, c, p| Box::pin(f(s, c, p))));
        self
    }

    /// Called after each successfully flushed outbound frame.
    pub fn with_on_write<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Service>, Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.on_write = Some(Arc::new(move |s, c| Box::pin(f(s, c))));
        self
    }

    /// Called exactly once per connection at end-of-life.
    pub fn with_on_disconnected<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Service>, Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.on_disconnected = Some(Arc::new(move |s, c| Box::pin(f(s, c))));
        self
    }

    /// Called on framing or I/O errors before `on_disconnected`, and on
    /// resolve/connect failures with no connection attached.
    pub fn with_on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Service>, Option<Arc<Connection>>, TransportError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |s, c, e| Box::pin(f(s, c, e))));
        self
    }

    pub fn on_connect(&self) -> Option<LifecycleHandler> {
        self.on_connect.clone()
    }

    pub fn on_accepted(&self) -> Option<LifecycleHandler> {
        self.on_accepted.clone()
    }

    pub fn on_read(&self) -> Option<ReadHandler> {
        self.on_read.clone()
    }

    pub fn on_write(&self) -> Option<LifecycleHandler> {
        self.on_write.clone()
    }

    pub fn on_disconnected(&self) -> Option<LifecycleHandler> {
        self.on_disconnected.clone()
    }

    pub fn on_error(&self) -> Option<ErrorHandler> {
        self.on_error.clone()
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_accepted", &self.on_accepted.is_some())
            .field("on_read", &self.on_read.is_some())
            .field("on_write", &self.on_write.is_some())
            .field("on_disconnected", &self.on_disconnected.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

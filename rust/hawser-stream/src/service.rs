//! Service registry: one named endpoint owning a dynamic set of connections.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::cancel::CancelScope;
use crate::client::{self, RetryPolicy};
use crate::connection::{Connection, ConnectionId};
use crate::handlers::Handlers;
use crate::listener;

/// Process-unique service identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(Uuid);

impl ServiceId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Which side of the transport this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Bind a local port and accept inbound streams.
    Server,
    /// Establish and maintain outbound connections.
    Client,
}

/// Tunables for one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Cap on a single frame's payload, inbound and outbound.
    pub max_frame_size: u32,
    /// Deadline for each frame attempt, reset after every completed frame.
    pub read_deadline: Duration,
    /// Intended number of parallel connections (client role). Values below
    /// one are treated as one.
    pub scale: u32,
    /// Reconnect behavior (client role).
    pub retry: RetryPolicy,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            max_frame_size: hawser_frame::DEFAULT_MAX_FRAME_SIZE,
            read_deadline: Duration::from_secs(60 * 60),
            scale: 1,
            retry: RetryPolicy::default(),
        }
    }
}

/// A named endpoint (server or client role) owning the set of active
/// connections.
///
/// The registry mutex protects only the set; callbacks and I/O are never
/// invoked while holding it. Iteration always goes through [`snapshot`],
/// a stable copy safe to walk outside the lock.
///
/// [`snapshot`]: Service::snapshot
pub struct Service {
    id: ServiceId,
    host: String,
    port: AtomicU16,
    role: Role,
    running: AtomicBool,
    handlers: Handlers,
    config: EndpointConfig,
    connections: Mutex<Vec<Arc<Connection>>>,
    cancel: CancelScope,
}

impl Service {
    /// Bind an endpoint with default configuration and start its driver:
    /// the accept loop for [`Role::Server`], the supervisor fleet for
    /// [`Role::Client`]. Must be called within a tokio runtime.
    ///
    /// A server bound to port 0 publishes the OS-assigned port once the
    /// listener is up; wait for [`get_running`](Service::get_running) before
    /// reading it.
    pub fn bind(role: Role, host: impl Into<String>, port: u16, handlers: Handlers) -> Arc<Self> {
        Self::bind_with(role, host, port, handlers, EndpointConfig::default())
    }

    /// [`bind`](Service::bind) with explicit tunables.
    pub fn bind_with(
        role: Role,
        host: impl Into<String>,
        port: u16,
        handlers: Handlers,
        config: EndpointConfig,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            id: ServiceId::generate(),
            host: host.into(),
            port: AtomicU16::new(port),
            role,
            running: AtomicBool::new(false),
            handlers,
            config,
            connections: Mutex::new(Vec::new()),
            cancel: CancelScope::new(),
        });

        match role {
            Role::Server => {
                let svc = service.clone();
                tokio::spawn(async move {
                    if let Err(err) = listener::run_listener(svc.clone()).await {
                        error!(service_id = %svc.id, error = %err, "listener terminated");
                        svc.set_running(false);
                    }
                });
            }
            Role::Client => {
                tokio::spawn(client::run_client(service.clone()));
            }
        }

        service
    }

    pub fn get_id(&self) -> ServiceId {
        self.id
    }

    pub fn get_host(&self) -> &str {
        &self.host
    }

    pub fn get_port(&self) -> u16 {
        self.port.load(Ordering::Acquire)
    }

    pub(crate) fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::Release);
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn get_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Effective parallel-connection count: `scale` clamped to at least one.
    pub fn scale(&self) -> u32 {
        self.config.scale.max(1)
    }

    pub(crate) fn cancel_scope(&self) -> &CancelScope {
        &self.cancel
    }

    /// Register a connection. Callers only admit while the service is
    /// running.
    pub(crate) fn add(&self, conn: Arc<Connection>) {
        let mut conns = self.connections.lock().expect("registry poisoned");
        conns.push(conn);
    }

    /// Deregister by id. True exactly once per registered connection;
    /// idempotent on repeat.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let mut conns = self.connections.lock().expect("registry poisoned");
        let before = conns.len();
        conns.retain(|c| c.id() != id);
        conns.len() != before
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        let conns = self.connections.lock().expect("registry poisoned");
        conns.iter().any(|c| c.id() == id)
    }

    /// A stable copy of the current connection set, safe to iterate outside
    /// the registry lock.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        let conns = self.connections.lock().expect("registry poisoned");
        conns.clone()
    }

    /// Stop the endpoint: refuse new admissions, fire the cancel scope, and
    /// drive every registered connection to termination. Per-connection
    /// handler failures are logged and swallowed; this never fails.
    pub fn stop_clients(self: &Arc<Self>) {
        debug!(service_id = %self.id, "stopping clients");
        self.set_running(false);
        self.cancel.cancel();

        for conn in self.snapshot() {
            // The scope fire above already reaches every session; cancelling
            // the connection directly also covers scopes created detached.
            conn.cancel_scope().cancel();

            if conn.begin_close() {
                let service = self.clone();
                tokio::spawn(async move {
                    if let Some(on_disconnected) = service.handlers().on_disconnected() {
                        if let Err(err) = on_disconnected(service.clone(), conn.clone()).await {
                            warn!(
                                conn_id = %conn.id(),
                                error = %err,
                                "on_disconnected handler failed during stop"
                            );
                        }
                    }
                    service.remove(conn.id());
                });
            }
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.get_port())
            .field("role", &self.role)
            .field("running", &self.get_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn detached_service() -> Arc<Service> {
        Arc::new(Service {
            id: ServiceId::generate(),
            host: "127.0.0.1".into(),
            port: AtomicU16::new(0),
            role: Role::Server,
            running: AtomicBool::new(true),
            handlers: Handlers::new(),
            config: EndpointConfig::default(),
            connections: Mutex::new(Vec::new()),
            cancel: CancelScope::new(),
        })
    }

    fn register_one(service: &Arc<Service>) -> ConnectionId {
        let (write_tx, _write_rx) = mpsc::unbounded_channel();
        let id = ConnectionId::generate();
        let conn = Arc::new(Connection::new(
            id,
            service,
            write_tx,
            service.cancel_scope().child(),
        ));
        service.add(conn);
        id
    }

    #[test]
    fn remove_is_true_exactly_once() {
        let service = detached_service();
        let id = register_one(&service);

        assert!(service.contains(id));
        assert!(service.remove(id));
        assert!(!service.remove(id));
        assert!(!service.contains(id));
    }

    #[test]
    fn snapshot_is_stable_against_later_mutation() {
        let service = detached_service();
        let id = register_one(&service);

        let snapshot = service.snapshot();
        assert_eq!(snapshot.len(), 1);

        service.remove(id);
        assert_eq!(snapshot.len(), 1, "copies must not track the registry");
        assert!(service.snapshot().is_empty());
    }

    #[test]
    fn connections_are_tracked_independently() {
        let service = detached_service();
        let a = register_one(&service);
        let b = register_one(&service);

        assert!(service.remove(a));
        assert!(service.contains(b));
        assert!(!service.contains(a));
    }

    #[test]
    fn scale_clamps_to_one() {
        let mut config = EndpointConfig::default();
        config.scale = 0;
        let service = Arc::new(Service {
            id: ServiceId::generate(),
            host: "127.0.0.1".into(),
            port: AtomicU16::new(0),
            role: Role::Client,
            running: AtomicBool::new(false),
            handlers: Handlers::new(),
            config,
            connections: Mutex::new(Vec::new()),
            cancel: CancelScope::new(),
        });
        assert_eq!(service.scale(), 1);
    }
}

//! Client-role supervisor: resolve, connect, run a session, retry with
//! exponential backoff and jitter.
//!
//! Each of the service's `scale` fibers maintains one target connection
//! alive. A clean session end resets the attempt counter and reconnects
//! after a short cool-down; failures back off exponentially with jitter so
//! a fleet of clients does not thunder against a recovering server.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::connection::{Connection, ConnectionId};
use crate::errors::TransportError;
use crate::service::Service;
use crate::session::{fire_disconnected, fire_error, Session};

/// Cool-down between reconnects after a clean close.
const RECONNECT_COOLDOWN: Duration = Duration::from_millis(200);
/// How often a fiber checks whether its session has completed.
const POLL_TICK: Duration = Duration::from_millis(100);
/// Backoff doubling stops here; the max-delay cap does the rest.
const MAX_BACKOFF_SHIFT: u32 = 16;

const JITTER_MIN: f64 = 0.8;
const JITTER_MAX: f64 = 1.2;

/// Reconnection behavior for client-role services.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay; doubles each failed attempt.
    pub base_delay: Duration,
    /// Cap on a single backoff wait.
    pub max_delay: Duration,
    /// Give up after this many consecutive failures; non-positive means
    /// retry forever.
    pub max_attempts: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: -1,
        }
    }
}

impl RetryPolicy {
    /// Pre-jitter backoff for a failed attempt (1-indexed).
    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.min(MAX_BACKOFF_SHIFT);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    /// Backoff with uniform jitter applied.
    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
        self.backoff_for_attempt(attempt).mul_f64(jitter)
    }
}

/// Spawn the supervisor fleet for a client-role service, then mark it
/// running.
pub(crate) async fn run_client(service: Arc<Service>) {
    let fibers = service.scale();
    debug!(service_id = %service.get_id(), fibers, "starting client supervisors");

    for fiber in 0..fibers {
        tokio::spawn(single_connection(service.clone(), fiber));
    }
    service.set_running(true);
}

/// One supervisor fiber: keep one connection to the target alive until
/// cancelled or the retry budget runs out.
async fn single_connection(service: Arc<Service>, fiber: u32) {
    let scope = service.cancel_scope().clone();
    let policy = service.config().retry.clone();
    let mut attempt: u32 = 0;

    while !scope.is_cancelled() {
        attempt += 1;
        trace!(service_id = %service.get_id(), fiber, attempt, "connection attempt");

        let ok = run_single_attempt(&service).await;
        if scope.is_cancelled() {
            return;
        }

        if ok {
            attempt = 0;
            tokio::select! {
                _ = scope.cancelled() => return,
                _ = tokio::time::sleep(RECONNECT_COOLDOWN) => {}
            }
        } else {
            if policy.max_attempts > 0 && attempt as i64 >= policy.max_attempts as i64 {
                debug!(service_id = %service.get_id(), fiber, attempt, "retry budget exhausted");
                return;
            }
            let delay = policy.jittered_backoff(attempt);
            trace!(fiber, attempt, delay_ms = delay.as_millis() as u64, "backing off");
            tokio::select! {
                _ = scope.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// One resolve → connect → session cycle. True when the session ran and
/// ended on its own; false on any failure or cancellation.
async fn run_single_attempt(service: &Arc<Service>) -> bool {
    let scope = service.cancel_scope();
    let target = format!("{}:{}", service.get_host(), service.get_port());

    let addrs: Vec<SocketAddr> = match tokio::net::lookup_host(&target).await {
        Ok(addrs) => addrs.collect(),
        Err(err) => {
            fire_error(service, None, TransportError::HostNotResolved(err)).await;
            return false;
        }
    };
    if addrs.is_empty() {
        let err = io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {target}"));
        fire_error(service, None, TransportError::HostNotResolved(err)).await;
        return false;
    }

    let mut stream = None;
    let mut last_err = None;
    for addr in addrs {
        tokio::select! {
            biased;
            _ = scope.cancelled() => return false,
            connected = TcpStream::connect(addr) => match connected {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(err) => last_err = Some(err),
            }
        }
    }
    let Some(stream) = stream else {
        let err = last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no endpoint reachable"));
        fire_error(service, None, TransportError::ServiceNotFound(err)).await;
        return false;
    };

    if let Err(err) = stream.set_nodelay(true) {
        warn!(error = %err, "failed to set TCP_NODELAY");
    }

    let conn_id = ConnectionId::generate();
    let (write_tx, write_rx) = mpsc::unbounded_channel();
    let conn = Arc::new(Connection::new(
        conn_id,
        service,
        write_tx,
        scope.child(),
    ));
    service.add(conn.clone());
    debug!(service_id = %service.get_id(), conn_id = %conn_id, "connected");

    // Announce before the session spawns; the session skips both events for
    // client-role services so each fires exactly once.
    for handler in [
        service.handlers().on_connect(),
        service.handlers().on_accepted(),
    ]
    .into_iter()
    .flatten()
    {
        if let Err(err) = handler(service.clone(), conn.clone()).await {
            notify_error_and_close(service, &conn, TransportError::Handler(err)).await;
            return false;
        }
    }

    tokio::spawn(Session::new(service.clone(), conn.clone(), stream, write_rx).run());

    // The session deregisters itself when it completes; watch for that or
    // for cancellation, whichever lands first.
    loop {
        if !service.contains(conn.id()) {
            trace!(conn_id = %conn.id(), "session completed");
            return true;
        }
        tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            _ = tokio::time::sleep(POLL_TICK) => {}
        }
    }

    notify_error_and_close(service, &conn, TransportError::Cancelled).await;
    false
}

/// Terminal path for a supervisor-owned failure: report, run the
/// disconnected sequence when this caller wins the close claim, and tear
/// the session down.
async fn notify_error_and_close(service: &Arc<Service>, conn: &Arc<Connection>, err: TransportError) {
    if conn.begin_close() {
        fire_error(service, Some(conn), err).await;
        fire_disconnected(service, conn).await;
        service.remove(conn.id());
    }
    // Wakes the session if it is still in its read loop; it observes the
    // claim and just drops the socket.
    conn.cancel_scope().cancel();
}

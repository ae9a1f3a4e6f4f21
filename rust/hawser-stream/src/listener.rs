//! Accept loop for server-role services.

use std::io;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::connection::{Connection, ConnectionId};
use crate::service::Service;
use crate::session::Session;

/// Bind the service's port and accept until cancelled.
///
/// Binding to port 0 publishes the OS-assigned port on the service before
/// `running` flips true. Cancellation exits cleanly; any other accept error
/// is fatal for the endpoint and surfaces to the spawner.
pub(crate) async fn run_listener(service: Arc<Service>) -> io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", service.get_port())).await?;
    let local = listener.local_addr()?;
    service.set_port(local.port());
    service.set_running(true);
    debug!(service_id = %service.get_id(), addr = %local, "listening");

    let scope = service.cancel_scope().clone();

    loop {
        let (stream, peer) = tokio::select! {
            biased;

            _ = scope.cancelled() => {
                debug!(service_id = %service.get_id(), "accept loop cancelled");
                service.set_running(false);
                return Ok(());
            }

            accepted = listener.accept() => accepted?,
        };

        if !service.get_running() {
            // Admission closed while the accept was in flight.
            drop(stream);
            continue;
        }

        let conn_id = ConnectionId::generate();
        trace!(conn_id = %conn_id, %peer, "accepted");

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection::new(
            conn_id,
            &service,
            write_tx,
            scope.child(),
        ));
        service.add(conn.clone());

        // The session task announces on_connect/on_accepted itself.
        tokio::spawn(Session::new(service.clone(), conn, stream, write_rx).run());
    }
}

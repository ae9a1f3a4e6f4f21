//! Per-connection session: the state machine that drives one stream from
//! accept/connect to closed.
//!
//! One tokio task per connection owns the socket halves and serializes every
//! read, write, and handler call for it — the single-writer executor the
//! rest of the crate calls the connection's strand. The loop races the
//! framed reader against the write mailbox, the read deadline, and the
//! cancellation scope; whichever terminal event wins decides the closing
//! sequence.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hawser_frame::{self as frame, Frame};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::errors::TransportError;
use crate::framing::{FramedReadError, LengthFramed, ReadOutcome};
use crate::handlers::LifecycleHandler;
use crate::service::{Role, Service};

/// How a session's read loop ended.
enum Terminal {
    /// Peer departed at a frame boundary. `on_disconnected` only.
    Clean,
    /// Cancellation observed between frames. `on_disconnected` only.
    Cancelled,
    /// Transport or handler fault. `on_error` then `on_disconnected`.
    Faulted(TransportError),
}

pub(crate) struct Session {
    service: Arc<Service>,
    conn: Arc<Connection>,
    reader: LengthFramed<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    write_rx: mpsc::UnboundedReceiver<Bytes>,
    read_deadline: Duration,
}

impl Session {
    pub(crate) fn new(
        service: Arc<Service>,
        conn: Arc<Connection>,
        stream: TcpStream,
        write_rx: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        let max_frame_size = service.config().max_frame_size;
        let read_deadline = service.config().read_deadline;
        let (read_half, write_half) = stream.into_split();
        Self {
            service,
            conn,
            reader: LengthFramed::new(read_half, max_frame_size),
            writer: write_half,
            write_rx,
            read_deadline,
        }
    }

    pub(crate) async fn run(mut self) {
        let terminal = self.drive().await;
        self.finish(terminal).await;
    }

    async fn drive(&mut self) -> Terminal {
        // Server connections announce on the session task; client
        // connections were announced by their supervisor before spawn, so
        // each event fires exactly once per connection in both roles.
        if self.service.role() == Role::Server {
            if let Err(err) = self.fire(self.service.handlers().on_connect()).await {
                return Terminal::Faulted(err);
            }
            if let Err(err) = self.fire(self.service.handlers().on_accepted()).await {
                return Terminal::Faulted(err);
            }
        }

        let scope = self.conn.cancel_scope().clone();

        loop {
            // Deadline covers the whole frame: header wait through payload
            // completion. Keep-alives reset it like any completed frame.
            let deadline = Instant::now() + self.read_deadline;

            let received = loop {
                tokio::select! {
                    biased;

                    _ = scope.cancelled() => return Terminal::Cancelled,

                    _ = tokio::time::sleep_until(deadline) => {
                        return Terminal::Faulted(TransportError::Timeout);
                    }

                    outcome = self.reader.read_frame() => match outcome {
                        Ok(ReadOutcome::Frame(f)) => break f,
                        Ok(ReadOutcome::PeerClosed) => return Terminal::Clean,
                        Err(FramedReadError::TooLarge { len, max }) => {
                            return Terminal::Faulted(TransportError::FrameTooLarge { len, max });
                        }
                        Err(FramedReadError::Read(err)) => {
                            return Terminal::Faulted(TransportError::Read(err));
                        }
                    },

                    // The connection handle held by `self` keeps the sender
                    // side alive, so this arm never sees `None`.
                    Some(payload) = self.write_rx.recv() => {
                        if let Err(terminal) = self.handle_write(payload).await {
                            return terminal;
                        }
                    }
                }
            };

            match received {
                Frame::KeepAlive => {
                    trace!(conn_id = %self.conn.id(), "keep-alive frame");
                }
                Frame::Payload(payload) => {
                    // Cancellation that lands while the payload was in
                    // flight wins over dispatch.
                    if scope.is_cancelled() {
                        return Terminal::Cancelled;
                    }
                    trace!(
                        conn_id = %self.conn.id(),
                        len = payload.len(),
                        "dispatching frame"
                    );
                    if let Some(on_read) = self.service.handlers().on_read() {
                        if let Err(err) =
                            on_read(self.service.clone(), self.conn.clone(), payload).await
                        {
                            return Terminal::Faulted(TransportError::Handler(err));
                        }
                    }
                }
            }
        }
    }

    /// Frame and flush one queued payload, then fire `on_write`.
    ///
    /// Write failures are reported through `on_error` but do not end the
    /// session here: a broken socket surfaces on the next read.
    async fn handle_write(&mut self, payload: Bytes) -> Result<(), Terminal> {
        let encoded = match frame::encode(&payload, self.service.config().max_frame_size) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(
                    conn_id = %self.conn.id(),
                    len = payload.len(),
                    "dropping oversized outbound frame"
                );
                let err = io::Error::new(io::ErrorKind::InvalidInput, err);
                fire_error(&self.service, Some(&self.conn), TransportError::Write(err)).await;
                return Ok(());
            }
        };

        let flushed = async {
            self.writer.write_all(&encoded).await?;
            self.writer.flush().await
        }
        .await;

        if let Err(err) = flushed {
            fire_error(&self.service, Some(&self.conn), TransportError::Write(err)).await;
            return Ok(());
        }

        if let Some(on_write) = self.service.handlers().on_write() {
            if let Err(err) = on_write(self.service.clone(), self.conn.clone()).await {
                return Err(Terminal::Faulted(TransportError::Handler(err)));
            }
        }
        Ok(())
    }

    /// The closing sequence: `on_error` when faulted, `on_disconnected`,
    /// deregistration, then socket teardown. Runs only for the side that
    /// wins the close claim, so it executes at most once per connection.
    async fn finish(mut self, terminal: Terminal) {
        if !self.conn.begin_close() {
            // stop_clients (or a supervisor) already owns the teardown;
            // dropping the halves closes the socket.
            trace!(conn_id = %self.conn.id(), "close already claimed");
            return;
        }

        let faulted = matches!(terminal, Terminal::Faulted(_));
        match terminal {
            Terminal::Clean => debug!(conn_id = %self.conn.id(), "peer closed"),
            Terminal::Cancelled => debug!(conn_id = %self.conn.id(), "session cancelled"),
            Terminal::Faulted(err) => {
                debug!(conn_id = %self.conn.id(), error = %err, "session faulted");
                fire_error(&self.service, Some(&self.conn), err).await;
            }
        }

        fire_disconnected(&self.service, &self.conn).await;
        self.service.remove(self.conn.id());

        if !faulted {
            // Graceful half-close of the send side; the peer reads EOF.
            let _ = self.writer.shutdown().await;
        }
        // Dropping the halves releases the socket on every path.
    }

    async fn fire(&self, handler: Option<LifecycleHandler>) -> Result<(), TransportError> {
        if let Some(handler) = handler {
            handler(self.service.clone(), self.conn.clone())
                .await
                .map_err(TransportError::Handler)?;
        }
        Ok(())
    }
}

/// Invoke `on_error` if registered. A failing error handler is only logged.
pub(crate) async fn fire_error(
    service: &Arc<Service>,
    conn: Option<&Arc<Connection>>,
    err: TransportError,
) {
    if let Some(on_error) = service.handlers().on_error() {
        if let Err(handler_err) = on_error(service.clone(), conn.cloned(), err).await {
            warn!(error = %handler_err, "on_error handler failed");
        }
    }
}

/// Invoke `on_disconnected` if registered. A failing handler is only logged.
pub(crate) async fn fire_disconnected(service: &Arc<Service>, conn: &Arc<Connection>) {
    if let Some(on_disconnected) = service.handlers().on_disconnected() {
        if let Err(err) = on_disconnected(service.clone(), conn.clone()).await {
            warn!(conn_id = %conn.id(), error = %err, "on_disconnected handler failed");
        }
    }
}

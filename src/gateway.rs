//! Gateway controller.
//!
//! [`Gateway`] is the context object every session handler shares. It
//! owns the connection registry, the command framer and the interpreter
//! handle, and turns transport events (connect, data, error, disconnect)
//! into connection state transitions and interpreter dispatches.

use crate::config::Config;
use crate::connection::{ConnEvent, Connection, ConnectionId, Outbound};
use crate::error::{AdmitError, Rejected, SendError};
use crate::framer::CommandFramer;
use crate::interpreter::Interpreter;
use crate::registry::ConnectionRegistry;
use crate::sink::ResponseSink;
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Version tag reported by the info endpoint.
pub const VERSION_TAG: &str = concat!("command-gateway ", env!("CARGO_PKG_VERSION"));

/// Error text sent to a client refused for lack of capacity.
pub const CAPACITY_ERROR: &str = "Max clients reached";

/// Diagnostic snapshot served by the info endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInfo {
    pub version: String,
    pub clients: usize,
    pub max_clients: usize,
}

/// Notice sent once to an admitted client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Welcome {
    connected: bool,
    client_id: u64,
}

/// Notice sent once to a refused client.
#[derive(Debug, Serialize)]
struct Refusal<'a> {
    error: &'a str,
}

/// A connection that was not admitted.
///
/// The capacity notice has been sent and a close requested; the caller
/// should still report the transport teardown through
/// [`Gateway::on_disconnect`].
#[derive(Debug)]
pub struct Refused {
    pub conn: Arc<Connection>,
    pub reason: AdmitError,
}

/// What happened to one inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Interpreter ran; `sent` messages went back to the client.
    Handled { sent: usize },
    /// Payload failed framing and was dropped without a reply.
    Dropped(Rejected),
    /// Connection was not open; payload ignored.
    NotOpen,
}

/// Shared gateway context.
pub struct Gateway {
    registry: ConnectionRegistry,
    framer: CommandFramer,
    buffer_capacity: usize,
    interpreter: Arc<dyn Interpreter>,
}

impl Gateway {
    pub fn new(
        max_connections: usize,
        max_command_length: usize,
        buffer_capacity: usize,
        interpreter: Arc<dyn Interpreter>,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(max_connections),
            framer: CommandFramer::new(max_command_length),
            buffer_capacity,
            interpreter,
        }
    }

    /// Create a gateway using the limits from `config`.
    pub fn from_config(config: &Config, interpreter: Arc<dyn Interpreter>) -> Self {
        Self::new(
            config.max_connections,
            config.max_command_length,
            config.buffer_capacity,
            interpreter,
        )
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Transport reported a new session.
    ///
    /// Admitted connections are moved to `Open` and greeted with their
    /// identity. Refused ones get a single capacity notice and are closed.
    pub fn on_connect(
        &self,
        remote_addr: SocketAddr,
        outbound: Box<dyn Outbound>,
    ) -> Result<Arc<Connection>, Refused> {
        let conn = self.registry.candidate(remote_addr, outbound);

        match self.registry.admit(&conn) {
            Ok(()) => {
                // Queue the welcome before opening so no broadcast can precede it.
                let welcome = Welcome {
                    connected: true,
                    client_id: conn.id().0,
                };
                send_json(&conn, &welcome, Connection::send_notice);
                transition(&conn, ConnEvent::Admitted);
                info!(
                    conn_id = %conn.id(),
                    peer = %remote_addr,
                    clients = self.registry.count(),
                    "Client connected"
                );
                Ok(conn)
            }
            Err(reason) => {
                send_json(
                    &conn,
                    &Refusal {
                        error: CAPACITY_ERROR,
                    },
                    Connection::send_notice,
                );
                transition(&conn, ConnEvent::Rejected);
                conn.close();
                warn!(conn_id = %conn.id(), peer = %remote_addr, %reason, "Client rejected");
                Err(Refused { conn, reason })
            }
        }
    }

    /// Transport delivered a payload for `conn`.
    ///
    /// Runs to completion, including the final flush, before returning.
    /// Interpreter failures are logged; they never touch the registry.
    pub fn on_data(&self, conn: &Connection, payload: &[u8]) -> Dispatch {
        transition(conn, ConnEvent::Data);
        if !conn.is_open() {
            trace!(conn_id = %conn.id(), state = ?conn.state(), "Payload for non-open connection ignored");
            return Dispatch::NotOpen;
        }

        let command = match self.framer.normalize(payload) {
            Ok(command) => command,
            Err(reason) => {
                debug!(conn_id = %conn.id(), %reason, "Payload dropped");
                return Dispatch::Dropped(reason);
            }
        };
        debug!(conn_id = %conn.id(), %command, "Command");

        let mut sink = ResponseSink::new(conn, self.buffer_capacity);
        if let Err(e) = self.interpreter.interpret(command.as_str(), &mut sink) {
            warn!(conn_id = %conn.id(), %command, error = %e, "Interpreter failed");
        }
        sink.flush();

        Dispatch::Handled { sent: sink.sent() }
    }

    /// Transport reported an error on `conn`. Diagnostic only.
    pub fn on_error(&self, conn: &Connection, error: &dyn fmt::Display) {
        transition(conn, ConnEvent::Error);
        warn!(conn_id = %conn.id(), %error, "Connection error");
    }

    /// Transport reported teardown of `conn`.
    ///
    /// Safe to call more than once; only the first call has any effect.
    pub fn on_disconnect(&self, conn: &Connection) {
        let removed = self.registry.remove(conn.id()).is_some();

        match conn.apply(ConnEvent::Disconnected) {
            Ok(_) if removed => {
                let duration = Utc::now() - conn.connected_at();
                info!(
                    conn_id = %conn.id(),
                    peer = %conn.remote_addr(),
                    duration_secs = duration.num_seconds(),
                    clients = self.registry.count(),
                    "Client disconnected"
                );
            }
            Ok(_) => debug!(conn_id = %conn.id(), "Refused client disconnected"),
            Err(_) => trace!(conn_id = %conn.id(), "Duplicate disconnect ignored"),
        }
    }

    /// Ask the transport to close an open connection.
    ///
    /// Returns false if `id` is unknown or not open. Cleanup happens when
    /// the transport reports the disconnect.
    pub fn close(&self, id: ConnectionId) -> bool {
        let Some(conn) = self.registry.get(id) else {
            return false;
        };
        if conn.apply(ConnEvent::CloseRequested).is_err() {
            return false;
        }
        conn.close();
        true
    }

    /// Send `message` to every open connection. Returns the delivery count.
    pub fn broadcast(&self, message: &str) -> usize {
        let delivered = self.registry.broadcast(message);
        trace!(delivered, "Broadcast");
        delivered
    }

    /// Current diagnostic snapshot.
    pub fn info(&self) -> GatewayInfo {
        GatewayInfo {
            version: VERSION_TAG.to_string(),
            clients: self.registry.count(),
            max_clients: self.registry.max_connections(),
        }
    }
}

/// Apply `event`, logging edges the table does not allow.
fn transition(conn: &Connection, event: ConnEvent) {
    if let Err(e) = conn.apply(event) {
        warn!(conn_id = %conn.id(), error = %e, "Invalid state transition");
    }
}

fn send_json<T: Serialize>(
    conn: &Connection,
    payload: &T,
    send: fn(&Connection, &str) -> Result<(), SendError>,
) {
    match serde_json::to_string(payload) {
        Ok(text) => {
            if let Err(e) = send(conn, &text) {
                debug!(conn_id = %conn.id(), error = %e, "Notice dropped");
            }
        }
        Err(e) => warn!(conn_id = %conn.id(), error = %e, "Failed to encode notice"),
    }
}

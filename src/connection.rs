//! Connection state machine for gateway sessions.
//!
//! Each connection tracks its identity, its lifecycle state and the
//! outbound handle that messages to the client are written through.
//! State changes go through [`ConnState::next`], the single transition
//! table for the lifecycle:
//!
//! ```text
//! Connecting --Admitted-------> Open
//! Connecting --Rejected-------> Closing
//! Open       --CloseRequested-> Closing
//! Connecting | Open | Closing --Disconnected--> Closed
//! ```
//!
//! `Data` and `Error` events never change state.

use crate::error::{SendError, TransitionError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};

/// Identity assigned to a connection by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Transport session exists, admission not yet decided.
    Connecting,
    /// Admitted; commands are accepted and responses delivered.
    Open,
    /// Close requested; the transport has not reported teardown yet.
    Closing,
    /// Terminal.
    Closed,
}

/// Lifecycle events fed into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    Admitted,
    Rejected,
    Data,
    CloseRequested,
    Error,
    Disconnected,
}

impl ConnState {
    /// Transition table. Returns `None` when `event` has no edge from `self`.
    pub fn next(self, event: ConnEvent) -> Option<ConnState> {
        use ConnEvent::*;
        use ConnState::*;

        match (self, event) {
            (Connecting, Admitted) => Some(Open),
            (Connecting, Rejected) => Some(Closing),
            (Open, CloseRequested) => Some(Closing),
            (Connecting | Open | Closing, Disconnected) => Some(Closed),
            (state, Data | Error) => Some(state),
            _ => None,
        }
    }

    /// Whether the state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnState::Closed)
    }
}

/// Transport-side handle a connection transmits through.
///
/// Implementations must not block beyond handing the message to the
/// transport; delivery failures are reported, never retried.
pub trait Outbound: Send + Sync {
    /// Queue one text message for the client.
    fn send_text(&self, text: &str) -> Result<(), SendError>;

    /// Ask the transport to close the session.
    fn close(&self);
}

/// A single client connection.
pub struct Connection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    connected_at: DateTime<Utc>,
    state: Mutex<ConnState>,
    outbound: Box<dyn Outbound>,
}

impl Connection {
    /// Create a new connection in the `Connecting` state.
    pub fn new(id: ConnectionId, remote_addr: SocketAddr, outbound: Box<dyn Outbound>) -> Self {
        Self {
            id,
            remote_addr,
            connected_at: Utc::now(),
            state: Mutex::new(ConnState::Connecting),
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// When the transport session was created.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> ConnState {
        *self.lock_state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnState::Open
    }

    /// Apply a lifecycle event, returning the resulting state.
    ///
    /// The state is left untouched when the event has no edge.
    pub fn apply(&self, event: ConnEvent) -> Result<ConnState, TransitionError> {
        let mut state = self.lock_state();
        let from = *state;
        let to = from.next(event).ok_or(TransitionError { from, event })?;
        *state = to;
        Ok(to)
    }

    /// Send a message to an open connection.
    pub fn send(&self, text: &str) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotOpen);
        }
        self.outbound.send_text(text)
    }

    /// Send a lifecycle notice.
    ///
    /// Unlike [`Connection::send`] this also reaches a connection that is
    /// still being admitted or is closing, so a refused client can be told
    /// why before the transport drops it.
    pub fn send_notice(&self, text: &str) -> Result<(), SendError> {
        if self.state().is_terminal() {
            return Err(SendError::NotOpen);
        }
        self.outbound.send_text(text)
    }

    /// Request a transport-level close.
    pub fn close(&self) {
        self.outbound.close();
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}

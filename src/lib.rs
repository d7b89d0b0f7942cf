//! command-gateway: a WebSocket front end for a line-oriented command
//! interpreter.
//!
//! Clients connect over WebSocket, send command text and receive the
//! interpreter's output, one line per message, routed back to the sender
//! only. The gateway provides:
//! - Admission control with a fixed maximum number of clients
//! - Command framing (bare text is wrapped as `<...>`)
//! - Per-dispatch response buffering with bounded message size
//! - Broadcast to all open clients
//! - A JSON info endpoint for diagnostics

pub mod config;
pub mod connection;
pub mod error;
pub mod framer;
pub mod gateway;
pub mod interpreter;
pub mod registry;
pub mod server;
pub mod sink;

pub use gateway::Gateway;
pub use interpreter::Interpreter;

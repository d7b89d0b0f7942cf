//! Error types shared across the gateway.

use std::path::PathBuf;
use thiserror::Error;

use crate::connection::{ConnEvent, ConnState};

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Reason an admission attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmitError {
    #[error("connection limit reached ({max})")]
    AtCapacity { max: usize },
}

/// Reason an inbound payload was not turned into a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejected {
    #[error("empty payload")]
    Empty,
    #[error("payload of {len} bytes exceeds limit of {max}")]
    TooLong { len: usize, max: usize },
    #[error("payload is blank after trimming")]
    Blank,
    #[error("payload is not valid UTF-8")]
    NotUtf8,
}

/// Failure to hand a message to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("connection is not open")]
    NotOpen,
    #[error("transport channel closed")]
    ChannelClosed,
    #[error("outbound queue full")]
    QueueFull,
}

/// A lifecycle event that has no edge from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no transition from {from:?} on {event:?}")]
pub struct TransitionError {
    pub from: ConnState,
    pub event: ConnEvent,
}

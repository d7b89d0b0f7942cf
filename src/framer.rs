//! Inbound command framing.
//!
//! The interpreter expects commands wrapped in `<` ... `>`. Clients may
//! send either the framed form or bare command text; bare text is wrapped
//! here. Only the opening delimiter is inspected; checking that a frame is
//! closed is left to the interpreter.

use crate::error::Rejected;
use std::fmt;

/// Opening delimiter of an interpreter command frame.
pub const FRAME_START: char = '<';

/// Closing delimiter of an interpreter command frame.
pub const FRAME_END: char = '>';

/// A normalized command, ready for the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turns raw payloads into [`Command`]s.
#[derive(Debug, Clone, Copy)]
pub struct CommandFramer {
    max_command_length: usize,
}

impl CommandFramer {
    pub fn new(max_command_length: usize) -> Self {
        Self { max_command_length }
    }

    /// Normalize one inbound payload.
    ///
    /// The length limit applies to the raw payload, before trimming.
    pub fn normalize(&self, payload: &[u8]) -> Result<Command, Rejected> {
        if payload.is_empty() {
            return Err(Rejected::Empty);
        }
        if payload.len() > self.max_command_length {
            return Err(Rejected::TooLong {
                len: payload.len(),
                max: self.max_command_length,
            });
        }

        let text = std::str::from_utf8(payload).map_err(|_| Rejected::NotUtf8)?;
        let trimmed = text.trim_matches(is_frame_whitespace);
        if trimmed.is_empty() {
            return Err(Rejected::Blank);
        }

        if trimmed.starts_with(FRAME_START) {
            Ok(Command(trimmed.to_string()))
        } else {
            let mut framed = String::with_capacity(trimmed.len() + 2);
            framed.push(FRAME_START);
            framed.push_str(trimmed);
            framed.push(FRAME_END);
            Ok(Command(framed))
        }
    }
}

/// Space, CR and LF. Tabs and other whitespace are kept.
fn is_frame_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\r' | '\n')
}

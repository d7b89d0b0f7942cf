//! Per-dispatch response buffering.
//!
//! A [`ResponseSink`] collects what the interpreter writes for one command
//! and forwards it to the originating connection one output unit at a
//! time. A unit ends at a newline, or when the buffer reaches
//! `capacity - 2` bytes, so no single outbound message grows past the
//! configured capacity and nothing written is silently truncated.

use crate::connection::Connection;
use bytes::BytesMut;
use std::borrow::Cow;
use std::io::{self, Write};
use tracing::{debug, trace};

/// Smallest capacity whose unit (`capacity - 2`) holds a 4-byte UTF-8
/// sequence with room to spare.
pub const MIN_CAPACITY: usize = 6;

/// Buffered writer bound to one connection for one dispatch.
pub struct ResponseSink<'a> {
    conn: &'a Connection,
    buf: BytesMut,
    capacity: usize,
    sent: usize,
}

impl<'a> ResponseSink<'a> {
    /// Create a sink for `conn`. Capacities below [`MIN_CAPACITY`] are raised.
    pub fn new(conn: &'a Connection, capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Self {
            conn,
            buf: BytesMut::with_capacity(capacity),
            capacity,
            sent: 0,
        }
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Messages handed to the connection so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Append one byte, flushing when a unit completes.
    pub fn write_byte(&mut self, byte: u8) {
        if self.buf.len() >= self.capacity - 1 {
            self.flush_unit(false);
        }
        self.buf.extend_from_slice(&[byte]);

        if byte == b'\n' {
            self.flush_unit(false);
        } else if self.buf.len() >= self.capacity - 2 {
            self.flush_unit(true);
        }
    }

    /// Transmit whatever is buffered. Idempotent; always leaves the buffer empty.
    pub fn flush(&mut self) {
        self.flush_unit(false);
    }

    /// Send the buffered unit and clear the buffer.
    ///
    /// With `keep_tail`, an incomplete UTF-8 sequence or a lone `\r` at
    /// the end of the buffer stays behind to be completed by the next write.
    fn flush_unit(&mut self, keep_tail: bool) {
        if self.buf.is_empty() {
            return;
        }

        let mut unit = self.buf.split();
        if keep_tail {
            let tail_len = if unit.last() == Some(&b'\r') {
                1
            } else {
                incomplete_utf8_tail(&unit)
            };
            if tail_len > 0 {
                let tail = unit.split_off(unit.len() - tail_len);
                self.buf.extend_from_slice(&tail);
            }
        }

        let text = message_text(&unit);
        if text.is_empty() {
            return;
        }
        if !self.conn.is_open() {
            trace!(conn_id = %self.conn.id(), "Discarding output for closed connection");
            return;
        }

        match self.conn.send(&text) {
            Ok(()) => {
                self.sent += 1;
                trace!(conn_id = %self.conn.id(), len = text.len(), "Flushed response");
            }
            Err(e) => debug!(conn_id = %self.conn.id(), error = %e, "Response dropped"),
        }
    }
}

impl Write for ResponseSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            self.write_byte(byte);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        ResponseSink::flush(self);
        Ok(())
    }
}

/// Unit text without its line terminator.
fn message_text(unit: &[u8]) -> Cow<'_, str> {
    let mut end = unit.len();
    if end > 0 && unit[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && unit[end - 1] == b'\r' {
            end -= 1;
        }
    }
    String::from_utf8_lossy(&unit[..end])
}

/// Length of a truncated multi-byte UTF-8 sequence at the end of `bytes`.
fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    let window = bytes.len().min(3);
    for back in 1..=window {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

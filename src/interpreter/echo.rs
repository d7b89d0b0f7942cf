//! Loopback interpreter.

use super::Interpreter;
use std::io::{self, Write};

/// Writes each command back as one output line.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoInterpreter;

impl Interpreter for EchoInterpreter {
    fn interpret(&self, command: &str, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "{command}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_writes_one_line() {
        let mut out = Vec::new();
        EchoInterpreter.interpret("<s>", &mut out).unwrap();
        assert_eq!(out, b"<s>\n");
    }
}

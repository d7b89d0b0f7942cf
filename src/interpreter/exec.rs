//! Interpreter backed by an external program.
//!
//! The program is started once per command. The command text plus a
//! newline is written to its stdin, stdin is closed, and everything the
//! program prints on stdout is copied to the output writer as it arrives.

use super::Interpreter;
use std::io::{self, Write};
use std::process::{Command, Stdio};
use tracing::debug;

/// Runs `program args...` for every command.
#[derive(Debug, Clone)]
pub struct ExecInterpreter {
    program: String,
    args: Vec<String>,
}

impl ExecInterpreter {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

impl Interpreter for ExecInterpreter {
    fn interpret(&self, command: &str, out: &mut dyn Write) -> io::Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that never reads stdin may already be gone.
            match writeln!(stdin, "{command}") {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e),
                _ => {}
            }
        }

        if let Some(mut stdout) = child.stdout.take() {
            io::copy(&mut stdout, out)?;
        }

        let status = child.wait()?;
        debug!(program = %self.program, %status, "Interpreter process finished");
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!(
                "'{}' exited with {status}",
                self.program
            )))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_exec_copies_stdout() {
        let interpreter = ExecInterpreter::new("cat".to_string(), Vec::new());
        let mut out = Vec::new();
        interpreter.interpret("<s>", &mut out).unwrap();
        assert_eq!(out, b"<s>\n");
    }

    #[test]
    fn test_exec_reports_failure() {
        let interpreter = ExecInterpreter::new(
            "sh".to_string(),
            vec!["-c".to_string(), "echo partial; exit 3".to_string()],
        );
        let mut out = Vec::new();
        let err = interpreter.interpret("<s>", &mut out).unwrap_err();
        assert!(err.to_string().contains("exited"));
        assert_eq!(out, b"partial\n");
    }

    #[test]
    fn test_exec_missing_program() {
        let interpreter = ExecInterpreter::new("/nonexistent/interpreter".to_string(), Vec::new());
        let mut out = Vec::new();
        assert!(interpreter.interpret("<s>", &mut out).is_err());
    }
}

//! The interpreter boundary.
//!
//! The gateway treats the command interpreter as a black box: it is handed
//! one normalized command and a writer, and writes zero or more output
//! lines to it. Two adapters ship with the gateway:
//!
//! - `echo`: writes the framed command back as a single line. Useful when
//!   developing clients without a command station attached.
//! - `exec`: runs a configured program once per command, feeding the
//!   command on stdin and copying stdout back to the client.

pub mod echo;
pub mod exec;

pub use echo::EchoInterpreter;
pub use exec::ExecInterpreter;

use crate::config::{Config, InterpreterKind};
use std::io::{self, Write};
use std::sync::Arc;

/// A line-oriented command processor shared by all connections.
///
/// Called synchronously, one command at a time per connection; different
/// connections may call concurrently. No timeout is imposed by the
/// gateway.
pub trait Interpreter: Send + Sync + 'static {
    /// Process `command` and write any output lines to `out`.
    fn interpret(&self, command: &str, out: &mut dyn Write) -> io::Result<()>;
}

/// Build the interpreter selected by the configuration.
pub fn from_config(config: &Config) -> Arc<dyn Interpreter> {
    match &config.interpreter {
        InterpreterKind::Echo => Arc::new(EchoInterpreter),
        InterpreterKind::Exec { program, args } => {
            Arc::new(ExecInterpreter::new(program.clone(), args.clone()))
        }
    }
}

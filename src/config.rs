//! Configuration module for the command gateway.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values. Limits are read
//! once at startup and stay fixed for the life of the process.

use crate::error::ConfigError;
use crate::sink::MIN_CAPACITY;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the gateway
#[derive(Parser, Debug)]
#[command(name = "command-gateway")]
#[command(author = "command-gateway authors")]
#[command(version)]
#[command(about = "A WebSocket gateway for a line-oriented command interpreter", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of concurrent clients
    #[arg(short = 'n', long)]
    pub max_connections: Option<usize>,

    /// Maximum inbound command length in bytes
    #[arg(long)]
    pub max_command_length: Option<usize>,

    /// Response buffer capacity in bytes
    #[arg(long)]
    pub buffer_capacity: Option<usize>,

    /// Interpreter backend
    #[arg(short = 'i', long, value_enum)]
    pub interpreter: Option<InterpreterArg>,

    /// Program run by the exec interpreter
    #[arg(long)]
    pub program: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Interpreter backend selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpreterArg {
    Echo,
    Exec,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Connection and framing limits
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    /// Maximum number of concurrent clients
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum inbound command length in bytes
    #[serde(default = "default_max_command_length")]
    pub max_command_length: usize,
    /// Response buffer capacity in bytes
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_command_length: default_max_command_length(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

/// Interpreter backend configuration
#[derive(Debug, Deserialize)]
pub struct InterpreterConfig {
    #[serde(default = "default_interpreter")]
    pub kind: InterpreterArg,
    /// Program for the exec backend
    pub program: Option<String>,
    /// Arguments for the exec backend
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            kind: default_interpreter(),
            program: None,
            args: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_connections() -> usize {
    5
}

fn default_max_command_length() -> usize {
    128
}

fn default_buffer_capacity() -> usize {
    256
}

fn default_interpreter() -> InterpreterArg {
    InterpreterArg::Echo
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved interpreter selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpreterKind {
    Echo,
    Exec { program: String, args: Vec<String> },
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub max_connections: usize,
    pub max_command_length: usize,
    pub buffer_capacity: usize,
    pub interpreter: InterpreterKind,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            max_command_length: default_max_command_length(),
            buffer_capacity: default_buffer_capacity(),
            interpreter: InterpreterKind::Echo,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents =
                std::fs::read_to_string(config_path).map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over file values and validate the result.
    pub fn merge(cli: CliArgs, file: TomlConfig) -> Result<Self, ConfigError> {
        let kind = cli.interpreter.unwrap_or(file.interpreter.kind);
        let interpreter = match kind {
            InterpreterArg::Echo => InterpreterKind::Echo,
            InterpreterArg::Exec => {
                let program = cli.program.or(file.interpreter.program).ok_or_else(|| {
                    ConfigError::Invalid("exec interpreter requires a program".to_string())
                })?;
                InterpreterKind::Exec {
                    program,
                    args: file.interpreter.args,
                }
            }
        };

        let config = Config {
            listen: cli.listen.unwrap_or(file.server.listen),
            max_connections: cli
                .max_connections
                .unwrap_or(file.gateway.max_connections),
            max_command_length: cli
                .max_command_length
                .unwrap_or(file.gateway.max_command_length),
            buffer_capacity: cli
                .buffer_capacity
                .unwrap_or(file.gateway.buffer_capacity),
            interpreter,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                file.logging.level
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.max_command_length == 0 {
            return Err(ConfigError::Invalid(
                "max_command_length must be at least 1".to_string(),
            ));
        }
        if self.buffer_capacity < MIN_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "buffer_capacity must be at least {MIN_CAPACITY}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["command-gateway"];
        argv.extend_from_slice(args);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.gateway.max_connections, 5);
        assert_eq!(config.gateway.max_command_length, 128);
        assert_eq!(config.gateway.buffer_capacity, 256);
        assert_eq!(config.interpreter.kind, InterpreterArg::Echo);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:9000"

            [gateway]
            max_connections = 8
            max_command_length = 64
            buffer_capacity = 512

            [interpreter]
            kind = "exec"
            program = "/usr/local/bin/dcc-parser"
            args = ["--stdin"]

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.gateway.max_connections, 8);
        assert_eq!(config.gateway.max_command_length, 64);
        assert_eq!(config.gateway.buffer_capacity, 512);
        assert_eq!(config.interpreter.kind, InterpreterArg::Exec);
        assert_eq!(config.interpreter.args, vec!["--stdin"]);
        assert_eq!(config.logging.level, "debug");

        let merged = Config::merge(cli(&[]), config).unwrap();
        assert_eq!(
            merged.interpreter,
            InterpreterKind::Exec {
                program: "/usr/local/bin/dcc-parser".to_string(),
                args: vec!["--stdin".to_string()],
            }
        );
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [gateway]
            max_connections = 8
            "#,
        )
        .unwrap();

        let config = Config::merge(cli(&["-n", "2", "--listen", "127.0.0.1:0"]), file).unwrap();
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.listen, "127.0.0.1:0");
        assert_eq!(config.max_command_length, 128);
        assert_eq!(config.interpreter, InterpreterKind::Echo);
    }

    #[test]
    fn test_exec_requires_program() {
        let err = Config::merge(cli(&["--interpreter", "exec"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = Config::merge(
            cli(&["--interpreter", "exec", "--program", "cat"]),
            TomlConfig::default(),
        )
        .unwrap();
        assert!(matches!(config.interpreter, InterpreterKind::Exec { .. }));
    }

    #[test]
    fn test_rejects_zero_limits() {
        for args in [
            &["-n", "0"][..],
            &["--max-command-length", "0"][..],
            &["--buffer-capacity", "5"][..],
        ] {
            let result = Config::merge(cli(args), TomlConfig::default());
            assert!(matches!(result, Err(ConfigError::Invalid(_))), "{args:?}");
        }
    }
}

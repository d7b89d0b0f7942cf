//! command-gateway binary.
//!
//! Loads configuration, sets up logging and serves the gateway on a
//! multi-threaded tokio runtime.

use command_gateway::config::Config;
use command_gateway::interpreter;
use command_gateway::server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        max_connections = config.max_connections,
        max_command_length = config.max_command_length,
        buffer_capacity = config.buffer_capacity,
        interpreter = ?config.interpreter,
        "Starting command-gateway"
    );

    let interpreter = interpreter::from_config(&config);
    let server = Server::new(config, interpreter);
    server.run().await
}

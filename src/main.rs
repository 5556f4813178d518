//! line-control: a line-oriented text control server
//!
//! Peers send one command line at a time (LF-terminated) and receive
//! LF-terminated replies. Several commands may be pipelined in one write;
//! an empty line ends the session.
//!
//! Features:
//! - Exact line framing under several end-of-line conventions
//! - Built-in command language with `;`-separated command lists
//! - TCP listener or a single session over stdin/stdout
//! - Configuration via CLI arguments or TOML file

use line_control::config::Config;
use line_control::server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging; stdout may be carrying the control session
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        listen = %config.listen,
        stdio = config.stdio,
        max_connections = config.max_connections,
        max_line_length = config.max_line_length,
        "Starting line-control server"
    );

    let server = Server::new(config.clone());
    if config.stdio {
        let totals = server.run_stdio().await?;
        info!(
            executed = totals.executed,
            parse_errors = totals.parse_errors,
            discarded = totals.discarded,
            "Stdio session finished"
        );
    } else {
        server.run().await?;
    }

    Ok(())
}

//! Webterm server - one shared terminal, many viewers, one keyboard at a time.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use webterm_server::{config, logging, routes, state};

use config::Config;
use logging::{LogConfig, LogFormat};
use state::AppState;

/// Webterm server - share a terminal over WebSockets.
#[derive(Parser, Debug)]
#[command(name = "webterm-server")]
#[command(about = "Share one terminal session with any number of browser clients")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override port from config
    #[arg(short, long)]
    port: Option<u16>,

    /// Override listen address from config
    #[arg(long, value_name = "ADDR")]
    ip: Option<String>,

    /// Override the command run in the shared terminal
    #[arg(long, value_name = "PROGRAM")]
    command: Option<String>,

    /// Enable verbose logging (INFO level for everything)
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging (includes every request and output chunk)
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g., "pty=debug" or "ws=trace").
    /// Can be specified multiple times. Targets are prefixed with "webterm::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load()?,
    };

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ip) = cli.ip {
        config.host = ip;
    }
    if let Some(command) = cli.command {
        config.command = command;
    }

    tracing::info!(
        target: "webterm::startup",
        "Loaded configuration (port: {}, command: {}, {}x{})",
        config.port,
        config.command_line(),
        config.cols,
        config.rows
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let state = Arc::new(AppState::new(config));

    // A command that cannot launch is a configuration error; fail before serving.
    state
        .coordinator
        .start()
        .context("Failed to start the shared terminal")?;
    tracing::info!(target: "webterm::startup", "Shared terminal running");

    let app = routes::router(state);

    tracing::info!(target: "webterm::startup", "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

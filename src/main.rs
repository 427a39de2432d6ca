//! sni-audit-proxy: auditing forward proxy with SNI-based HTTPS blocking.
//!
//! This is the main entry point. It parses the command line, loads the
//! layered configuration, sets up diagnostic logging, and either runs a
//! subcommand or starts both proxies.
//!
//! # Output Streams
//!
//! - **Diagnostics** (`tracing`): stderr, filtered by `-v` or `RUST_LOG`.
//! - **Audit entries**: the audit line file and the in-memory store, never
//!   stderr.
//! - **Subcommand results**: stdout.

use anyhow::{Context, Result};
use clap::Parser;
use sni_audit_proxy::{cli::Cli, cli_handler, config::ConfigLoader, orchestrator};
use tracing::debug;

fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    // Load configuration with hierarchy merging
    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    init_tracing(cli.verbose, &config.general.log_level)?;

    debug!("Parsed CLI arguments: {:?}", cli);
    debug!("Loaded configuration: {:?}", config);

    match cli.command {
        Some(command) => cli_handler::handle_command(command, &config),
        None => orchestrator::run(config),
    }
}

/// Initialize the tracing subscriber for diagnostic logging.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, else the configured `log_level`
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, log_level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(log_level))
            .unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}

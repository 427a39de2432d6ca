//! Subcommand handling for sni-audit-proxy.
//!
//! `stats`, `export` and `clear` talk to a running proxy over its control
//! socket. `report` works offline on a persisted audit log file.

use anyhow::{Context, Result, bail};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::cli::Commands;
use crate::config::Config;
use crate::control::{ControlClient, ControlRequest, ControlResponse};
use crate::orchestrator::control_socket_path;
use crate::telemetry::{TrafficStats, compute_stats, read_log_file};

/// Handle a subcommand.
pub fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Stats { top, socket } => {
            let socket = resolve_socket(socket, config);
            match send_request(&socket, ControlRequest::Stats { top })? {
                ControlResponse::Stats(stats) => print_stats(&stats, &mut std::io::stdout()),
                other => unexpected(other),
            }
        }
        Commands::Export { path, socket } => {
            let socket = resolve_socket(socket, config);
            match send_request(&socket, ControlRequest::Export { path })? {
                ControlResponse::Exported { path, entries } => {
                    println!("Exported {} entries to {}", entries, path.display());
                    Ok(())
                }
                other => unexpected(other),
            }
        }
        Commands::Clear { socket } => {
            let socket = resolve_socket(socket, config);
            match send_request(&socket, ControlRequest::Clear)? {
                ControlResponse::Cleared { removed } => {
                    println!("Cleared {} entries", removed);
                    Ok(())
                }
                other => unexpected(other),
            }
        }
        Commands::Report {
            audit_log,
            top,
            json,
        } => run_report(&audit_log, top, json),
    }
}

/// Compute and print statistics from an audit log file.
fn run_report(audit_log: &Path, top: usize, json: bool) -> Result<()> {
    let entries = read_log_file(audit_log)
        .with_context(|| format!("Failed to read audit log {}", audit_log.display()))?;
    let stats = compute_stats(&entries, top);

    if json {
        let rendered =
            serde_json::to_string_pretty(&stats).context("Failed to serialize statistics")?;
        println!("{}", rendered);
        Ok(())
    } else {
        print_stats(&stats, &mut std::io::stdout())
    }
}

fn resolve_socket(socket: Option<PathBuf>, config: &Config) -> PathBuf {
    socket.unwrap_or_else(|| control_socket_path(config))
}

/// Send one request to a running proxy.
fn send_request(socket: &Path, request: ControlRequest) -> Result<ControlResponse> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    rt.block_on(async {
        let mut client = ControlClient::connect(socket).await.with_context(|| {
            format!(
                "Failed to connect to control socket {} (is the proxy running?)",
                socket.display()
            )
        })?;
        client
            .request(&request)
            .await
            .with_context(|| format!("Control request '{}' failed", request))
    })
}

fn unexpected(response: ControlResponse) -> Result<()> {
    match response {
        ControlResponse::Error(message) => bail!("Proxy reported an error: {}", message),
        other => bail!("Unexpected response from proxy: {:?}", other),
    }
}

/// Render statistics as a human-readable table.
pub fn print_stats<W: Write>(stats: &TrafficStats, out: &mut W) -> Result<()> {
    writeln!(out, "Total requests: {}", stats.total_requests)?;
    writeln!(out, "Unique hosts:   {}", stats.unique_hosts)?;
    writeln!(
        out,
        "Protocols:      HTTP {} / HTTPS {}",
        stats.protocols.http, stats.protocols.https
    )?;

    if stats.top_hosts.is_empty() {
        return Ok(());
    }

    let width = stats
        .top_hosts
        .iter()
        .map(|h| h.host.len())
        .max()
        .unwrap_or(0);

    writeln!(out)?;
    writeln!(out, "Top hosts:")?;
    for (rank, host) in stats.top_hosts.iter().enumerate() {
        writeln!(
            out,
            "  {:>2}. {:<width$}  {}",
            rank + 1,
            host.host,
            host.count,
            width = width
        )?;
    }
    Ok(())
}

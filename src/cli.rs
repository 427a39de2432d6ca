//! Command-line interface definitions for sni-audit-proxy.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Auditing HTTP/CONNECT forward proxy with SNI-based HTTPS blocking.
///
/// Without a subcommand, sni-audit-proxy runs both listeners: a forward proxy
/// that records every HTTP request and CONNECT tunnel, and an SNI tunnel that
/// reads the hostname from each TLS ClientHello and refuses blocked domains
/// without decrypting anything.
#[derive(Parser, Debug)]
#[command(name = "sni-audit-proxy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run (or omit to run the proxies).
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Address both proxies bind to.
    #[arg(long = "bind", value_name = "ADDR")]
    pub bind: Option<String>,

    /// Port of the HTTP/CONNECT forward proxy.
    #[arg(long = "http-port", value_name = "PORT")]
    pub http_port: Option<u16>,

    /// Port of the SNI tunnel proxy.
    #[arg(long = "sni-port", value_name = "PORT")]
    pub sni_port: Option<u16>,

    /// Block a domain on the SNI tunnel (repeatable).
    #[arg(short = 'b', long = "block", value_name = "DOMAIN")]
    pub block: Vec<String>,

    /// Append audit lines to this file.
    #[arg(long = "audit-log", value_name = "PATH")]
    pub audit_log: Option<PathBuf>,

    /// Write a JSON snapshot of the audit log here on shutdown.
    #[arg(long = "export-on-exit", value_name = "PATH")]
    pub export_on_exit: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Subcommands for sni-audit-proxy.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print traffic statistics from a running proxy.
    Stats {
        /// Number of hosts in the ranking (defaults to the proxy's setting).
        #[arg(long = "top", value_name = "N")]
        top: Option<usize>,

        /// Control socket of the running proxy.
        #[arg(long = "socket", value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Ask a running proxy to write a JSON snapshot of its audit log.
    Export {
        /// Destination file, as seen by the proxy process.
        #[arg(required = true)]
        path: PathBuf,

        /// Control socket of the running proxy.
        #[arg(long = "socket", value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Clear a running proxy's in-memory audit log.
    Clear {
        /// Control socket of the running proxy.
        #[arg(long = "socket", value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Compute statistics offline from a persisted audit log file.
    Report {
        /// Audit log file written with `--audit-log`.
        #[arg(required = true)]
        audit_log: PathBuf,

        /// Number of hosts in the ranking.
        #[arg(long = "top", value_name = "N", default_value_t = 10)]
        top: usize,

        /// Print the statistics as JSON.
        #[arg(long = "json")]
        json: bool,
    },
}

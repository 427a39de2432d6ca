//! sni-audit-proxy: auditing HTTP/CONNECT forward proxy with SNI-based
//! HTTPS blocking.
//!
//! Two listeners share one audit store:
//!
//! - **Forward proxy**: relays plain HTTP requests and opens CONNECT tunnels,
//!   recording the destination of each.
//! - **SNI proxy**: reads the server name from each TLS ClientHello, refuses
//!   hostnames on the block list, and tunnels the rest without decrypting.
//!
//! # Architecture
//!
//! - **Proxy**: both servers, the ClientHello parser and the block list
//! - **Telemetry**: audit entries, the audit store and traffic statistics
//! - **Config**: hierarchical TOML configuration
//! - **Control**: Unix socket IPC for querying a running proxy
//! - **CLI**: argument parsing and subcommands

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod control;
pub mod orchestrator;
pub mod proxy;
pub mod telemetry;

//! Control protocol message types.
//!
//! A client (the `stats`, `export` and `clear` subcommands) sends one
//! [`ControlRequest`] per frame and receives one [`ControlResponse`].
//!
//! # Message Flow
//!
//! ```text
//! ┌─────────────────┐   ControlRequest    ┌─────────────────┐
//! │                 │────────────────────>│                 │
//! │   CLI client    │                     │  Running proxy  │
//! │                 │<────────────────────│                 │
//! └─────────────────┘   ControlResponse   └─────────────────┘
//! ```

use crate::telemetry::TrafficStats;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Requests a client can send to a running proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlRequest {
    /// Liveness check.
    Ping,
    /// Current traffic statistics.
    Stats {
        /// Number of top hosts; the proxy's configured value when absent.
        top: Option<usize>,
    },
    /// Write a snapshot of the audit log to `path` on the proxy's host.
    Export {
        /// Destination file.
        path: PathBuf,
    },
    /// Empty the in-memory audit log.
    Clear,
}

/// Replies from the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlResponse {
    /// Reply to [`ControlRequest::Ping`].
    Pong,
    /// Reply to [`ControlRequest::Stats`].
    Stats(TrafficStats),
    /// Reply to [`ControlRequest::Export`].
    Exported {
        /// File written.
        path: PathBuf,
        /// Number of entries in the snapshot.
        entries: usize,
    },
    /// Reply to [`ControlRequest::Clear`].
    Cleared {
        /// Number of entries removed.
        removed: usize,
    },
    /// The request failed.
    Error(String),
}

impl std::fmt::Display for ControlRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlRequest::Ping => write!(f, "ping"),
            ControlRequest::Stats { top: Some(n) } => write!(f, "stats (top {})", n),
            ControlRequest::Stats { top: None } => write!(f, "stats"),
            ControlRequest::Export { path } => write!(f, "export to {}", path.display()),
            ControlRequest::Clear => write!(f, "clear"),
        }
    }
}

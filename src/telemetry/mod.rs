//! Audit logging and traffic statistics for sni-audit-proxy.
//!
//! Every plain HTTP request and every established tunnel is recorded as a
//! [`LogEntry`] in the shared [`AuditLog`]. The log answers statistics
//! queries, exports JSON snapshots, and optionally persists one line per entry.
//!
//! # Architecture
//!
//! - **Audit logging** (this module): what clients requested, persisted to an
//!   append-only file and queryable through the control socket
//! - **Diagnostic logging** (tracing): proxy health, failures and blocked
//!   SNI connections, written to stderr via `tracing`
//! - These are completely separate concerns: blocked connections and errors
//!   never enter the audit store
//!
//! # Usage
//!
//! ```
//! use sni_audit_proxy::telemetry::{AuditLog, LogEntry, Protocol};
//!
//! let audit = AuditLog::in_memory();
//! audit.record(LogEntry::new("GET", "example.com", "/", Protocol::Http, None));
//! audit.record(LogEntry::tunnel("example.com", None));
//!
//! let stats = audit.stats();
//! assert_eq!(stats.total_requests, 2);
//! assert_eq!(stats.unique_hosts, 1);
//! ```
//!
//! # Line Format
//!
//! ```text
//! 2026-01-07T14:32:01.123Z | HTTPS | CONNECT | api.example.com | -
//! ```

mod audit;
mod entry;
mod error;

pub use audit::{
    AuditLog, AuditSnapshot, HostCount, ProtocolSplit, TrafficStats, compute_stats, read_log_file,
};
pub use entry::{CONNECT_METHOD, FIELD_SEPARATOR, LogEntry, NO_USER_AGENT, Protocol};
pub use error::TelemetryError;

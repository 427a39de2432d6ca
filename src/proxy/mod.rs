//! Network proxies: an auditing HTTP/CONNECT forward proxy and an SNI-based
//! blocking tunnel.
//!
//! Neither proxy terminates TLS. The forward proxy sees plain HTTP requests
//! and CONNECT targets; the SNI proxy sees only the server name in the
//! client's ClientHello. Both feed the shared [`crate::telemetry::AuditLog`].
//!
//! # Architecture
//!
//! ```text
//!                   ┌──────────────────────────┐
//!  HTTP / CONNECT ─▶│  ForwardProxyServer      │──▶ origin:80 / host:port
//!                   │  (resolve, record, relay)│
//!                   └────────────┬─────────────┘
//!                                │ LogEntry
//!                                ▼
//!                        ┌──────────────┐
//!                        │   AuditLog   │
//!                        └──────────────┘
//!                                ▲ LogEntry
//!                   ┌────────────┴─────────────┐
//!  TLS ClientHello ▶│  SniProxyServer          │──▶ <sni>:443
//!                   │  (parse SNI, block list) │
//!                   └──────────────────────────┘
//! ```

pub mod blocklist;
pub mod client_hello;
pub mod connect;
pub mod context;
pub mod error;
pub mod server;
pub mod sni;
pub mod target;
pub mod tunnel;

// Re-export main types for convenient access
pub use blocklist::{BlockList, normalize_host};
pub use client_hello::{ClientHelloError, extract_sni, parse_server_name};
pub use connect::CONNECT_ESTABLISHED;
pub use context::{ConnectionState, ProxyConnection, ProxyContext};
pub use error::{ProxyError, ProxyResult};
pub use server::ForwardProxyServer;
pub use sni::{SniDecision, SniProxyServer};

//! Shared proxy state and per-connection bookkeeping.

use super::blocklist::BlockList;
use crate::telemetry::AuditLog;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

/// State shared by every connection handler of both proxies.
///
/// Built once at startup; cloning is cheap (two `Arc`s).
#[derive(Clone)]
pub struct ProxyContext {
    /// Hostnames refused by the SNI proxy.
    pub block_list: Arc<BlockList>,
    /// Audit store fed by both proxies.
    pub audit: Arc<AuditLog>,
}

impl ProxyContext {
    /// Create a context from its parts.
    pub fn new(block_list: Arc<BlockList>, audit: Arc<AuditLog>) -> Self {
        Self { block_list, audit }
    }
}

/// Lifecycle of one proxied connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted; waiting for the client's first bytes.
    AwaitingInitialBytes,
    /// First bytes received; choosing what to do.
    Deciding,
    /// Refused; the client is being closed.
    Blocked,
    /// Raw bytes are being bridged to the upstream.
    Tunneling,
    /// HTTP requests are being relayed.
    Forwarding,
    /// Both legs are closed.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::AwaitingInitialBytes => "awaiting-initial-bytes",
            ConnectionState::Deciding => "deciding",
            ConnectionState::Blocked => "blocked",
            ConnectionState::Tunneling => "tunneling",
            ConnectionState::Forwarding => "forwarding",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One client connection, owned by its handling task.
#[derive(Debug)]
pub struct ProxyConnection {
    /// Identifier used in diagnostics.
    pub id: Uuid,
    /// Client address.
    pub peer: SocketAddr,
    state: ConnectionState,
}

impl ProxyConnection {
    /// Track a freshly accepted connection.
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            state: ConnectionState::AwaitingInitialBytes,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next`, tracing the transition.
    pub fn transition(&mut self, next: ConnectionState) {
        trace!(
            conn = %self.id,
            peer = %self.peer,
            from = %self.state,
            to = %next,
            "connection state change"
        );
        self.state = next;
    }
}

impl Drop for ProxyConnection {
    fn drop(&mut self) {
        if self.state != ConnectionState::Closed {
            self.transition(ConnectionState::Closed);
        }
    }
}

//! Error types for proxy operations.
//!
//! This module defines structured error types for both proxies:
//! - Destination errors (a plain request that names no destination)
//! - Upstream errors (connect failures, upstream protocol failures)
//! - Connection errors (socket I/O, HTTP framing, early client disconnect)

use thiserror::Error;

/// Unified error type for proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error (socket operations).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// A plain request named no destination (no absolute URI, Host header or URL).
    #[error("Cannot determine destination for request target '{0}'")]
    UnresolvedDestination(String),

    /// Failed to connect to upstream server.
    #[error("Failed to connect to upstream '{addr}': {message}")]
    UpstreamConnect {
        /// The address we tried to connect to.
        addr: String,
        /// Error message.
        message: String,
    },

    /// The upstream connection was established but the exchange failed.
    #[error("Upstream '{addr}' failed: {message}")]
    UpstreamProtocol {
        /// The upstream address.
        addr: String,
        /// Error message.
        message: String,
    },

    /// The client closed the connection before sending anything usable.
    #[error("Peer disconnected")]
    PeerDisconnect,
}

impl ProxyError {
    /// Whether this is an ordinary connection teardown rather than a fault.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProxyError::PeerDisconnect => true,
            ProxyError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionAborted
            ),
            ProxyError::Http(e) => e.is_incomplete_message() || e.is_canceled(),
            _ => false,
        }
    }
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

//! SNI-based blocking tunnel.
//!
//! Clients connect to this listener as if it were the TLS server. The proxy
//! reads the first chunk (the ClientHello), extracts the server name, and
//! either closes the connection or opens a raw tunnel to
//! `<server name>:<upstream_port>`. TLS is never terminated: the ClientHello
//! is replayed to the upstream unchanged and every later byte is bridged as-is.
//!
//! # Flow
//!
//! ```text
//! client ──ClientHello──▶ proxy ── parse SNI ──▶ blocked? ── yes ──▶ close client
//!                                                   │
//!                                                   no
//!                                                   ▼
//!                              connect upstream, replay ClientHello, bridge
//! ```
//!
//! Only the first read is inspected. A ClientHello split across several TCP
//! segments yields no server name and falls to the unknown-SNI policy.

use super::blocklist::BlockList;
use super::client_hello::parse_server_name;
use super::context::{ConnectionState, ProxyConnection, ProxyContext};
use super::error::{ProxyError, ProxyResult};
use super::tunnel::{bridge, read_first_chunk};
use crate::config::{SniConfig, UnknownSniPolicy};
use crate::telemetry::LogEntry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Outcome of inspecting a ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SniDecision {
    /// The server name is on the block list.
    Blocked(String),
    /// No server name and the unknown-SNI policy is `block`.
    Rejected,
    /// Open a tunnel to `host`.
    Forward {
        /// Upstream host to connect to.
        host: String,
        /// Server name read from the ClientHello, if any.
        sni: Option<String>,
    },
}

/// Decide what to do with a connection given its server name.
pub fn decide(
    sni: Option<String>,
    block_list: &BlockList,
    unknown_sni: UnknownSniPolicy,
    fallback_host: &str,
) -> SniDecision {
    match sni {
        Some(host) if block_list.contains(&host) => SniDecision::Blocked(host),
        Some(host) => SniDecision::Forward {
            host: host.clone(),
            sni: Some(host),
        },
        None => match unknown_sni {
            UnknownSniPolicy::Block => SniDecision::Rejected,
            UnknownSniPolicy::Forward => SniDecision::Forward {
                host: fallback_host.to_string(),
                sni: None,
            },
        },
    }
}

/// The SNI tunnel server.
pub struct SniProxyServer {
    settings: Arc<SniConfig>,
    ctx: ProxyContext,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl SniProxyServer {
    /// Create a new SNI proxy server.
    ///
    /// # Arguments
    ///
    /// * `settings` - Upstream port, unknown-SNI policy and read buffer size.
    /// * `ctx` - Shared block list and audit log.
    /// * `shutdown_rx` - Receiver for shutdown signal.
    pub fn new(settings: SniConfig, ctx: ProxyContext, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            settings: Arc::new(settings),
            ctx,
            shutdown_rx,
        }
    }

    /// Accept connections until the shutdown signal is received.
    ///
    /// In-flight tunnels are not interrupted by shutdown.
    pub async fn serve(self, listener: TcpListener) -> ProxyResult<()> {
        info!("SNI proxy listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!("Accepted SNI connection from {}", peer);
                            self.spawn_connection_handler(stream, peer);
                        }
                        Err(e) => {
                            warn!("Failed to accept SNI connection: {}", e);
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("SNI proxy shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Spawn a task to handle a single connection.
    fn spawn_connection_handler(&self, stream: TcpStream, peer: SocketAddr) {
        let settings = self.settings.clone();
        let ctx = self.ctx.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, settings, ctx).await {
                if e.is_disconnect() {
                    debug!("SNI connection from {} ended: {}", peer, e);
                } else {
                    warn!("SNI connection from {} failed: {}", peer, e);
                }
            }
        });
    }
}

/// Handle a single client connection.
async fn handle_connection(
    mut client: TcpStream,
    peer: SocketAddr,
    settings: Arc<SniConfig>,
    ctx: ProxyContext,
) -> ProxyResult<()> {
    let mut conn = ProxyConnection::new(peer);

    let initial = read_first_chunk(&mut client, settings.read_buffer_size).await?;
    if initial.is_empty() {
        return Err(ProxyError::PeerDisconnect);
    }

    conn.transition(ConnectionState::Deciding);
    let sni = match parse_server_name(&initial) {
        Ok(sni) => sni,
        Err(e) => {
            debug!(conn = %conn.id, "No server name from {}: {}", peer, e);
            None
        }
    };

    match decide(
        sni,
        &ctx.block_list,
        settings.unknown_sni,
        &settings.fallback_host,
    ) {
        SniDecision::Blocked(host) => {
            conn.transition(ConnectionState::Blocked);
            warn!(conn = %conn.id, peer = %peer, host = %host, "blocked");
            Ok(())
        }
        SniDecision::Rejected => {
            conn.transition(ConnectionState::Blocked);
            warn!(conn = %conn.id, peer = %peer, "blocked: no server name in ClientHello");
            Ok(())
        }
        SniDecision::Forward { host, sni } => {
            let port = settings.upstream_port;
            let mut upstream = TcpStream::connect((host.as_str(), port))
                .await
                .map_err(|e| ProxyError::UpstreamConnect {
                    addr: format!("{}:{}", host, port),
                    message: e.to_string(),
                })?;

            upstream.write_all(&initial).await?;

            if let Some(sni) = sni {
                ctx.audit.record(LogEntry::tunnel(sni, None));
            }

            conn.transition(ConnectionState::Tunneling);
            debug!(conn = %conn.id, "Tunneling {} to {}:{}", peer, host, port);

            let stats = bridge(client, upstream).await?;
            debug!(
                conn = %conn.id,
                sent = stats.client_to_upstream,
                received = stats.upstream_to_client,
                "SNI tunnel to {} closed",
                host
            );
            Ok(())
        }
    }
}

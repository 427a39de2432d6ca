//! HTTP/CONNECT forward proxy server.
//!
//! Each accepted TCP connection runs in its own task. The proxy first reads
//! the client's request head itself:
//!
//! - A `CONNECT` is tunneled directly on the socket
//!   (see [`super::connect::tunnel_raw`]).
//! - Anything else is handed to hyper's HTTP/1.1 server, with the bytes read
//!   so far replayed in front of the socket. Later requests on the same
//!   connection, CONNECT included, are served by hyper.
//!
//! # Example
//!
//! ```ignore
//! use sni_audit_proxy::proxy::{ForwardProxyServer, ProxyContext};
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8888").await?;
//! let server = ForwardProxyServer::new(ctx, shutdown_rx);
//! tokio::spawn(server.serve(listener));
//!
//! // To shutdown:
//! shutdown_tx.send(true)?;
//! ```

use super::connect::{ProxyBody, handle_connect, handle_http, tunnel_raw};
use super::context::{ConnectionState, ProxyConnection, ProxyContext};
use super::error::{ProxyError, ProxyResult};
use super::tunnel::Rewind;
use bytes::BytesMut;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Largest request head the proxy buffers while sniffing for CONNECT.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

const MAX_HEADERS: usize = 64;

const CONNECT_PREFIX: &[u8] = b"CONNECT ";

/// What the first bytes of a connection turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sniffed {
    /// The head is not complete yet.
    Partial,
    /// A complete CONNECT request head.
    Connect {
        /// Request target, `host[:port]`.
        target: String,
        /// The `User-Agent` header, if any.
        user_agent: Option<String>,
        /// Length of the head in bytes.
        head_len: usize,
    },
    /// Anything else; hyper takes over.
    Other,
}

/// Classify the first bytes of a client connection.
pub fn sniff(buf: &[u8]) -> Sniffed {
    let prefix_len = buf.len().min(CONNECT_PREFIX.len());
    if buf[..prefix_len] != CONNECT_PREFIX[..prefix_len] {
        return Sniffed::Other;
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(head_len)) => {
            let user_agent = req
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case("user-agent"))
                .and_then(|h| std::str::from_utf8(h.value).ok())
                .map(str::to_string);
            Sniffed::Connect {
                target: req.path.unwrap_or_default().to_string(),
                user_agent,
                head_len,
            }
        }
        Ok(httparse::Status::Partial) => Sniffed::Partial,
        Err(_) => Sniffed::Other,
    }
}

/// The HTTP/CONNECT forward proxy.
pub struct ForwardProxyServer {
    ctx: ProxyContext,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl ForwardProxyServer {
    /// Create a new forward proxy server.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Shared block list and audit log.
    /// * `shutdown_rx` - Receiver for shutdown signal.
    pub fn new(ctx: ProxyContext, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self { ctx, shutdown_rx }
    }

    /// Accept connections until the shutdown signal is received.
    ///
    /// In-flight connections are not interrupted by shutdown.
    pub async fn serve(self, listener: TcpListener) -> ProxyResult<()> {
        info!("HTTP proxy listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!("Accepted HTTP connection from {}", peer);
                            self.spawn_connection_handler(stream, peer);
                        }
                        Err(e) => {
                            warn!("Failed to accept HTTP connection: {}", e);
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("HTTP proxy shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Spawn a task to handle a single connection.
    fn spawn_connection_handler(&self, stream: TcpStream, peer: SocketAddr) {
        let ctx = self.ctx.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, ctx).await {
                if e.is_disconnect() {
                    debug!("HTTP connection from {} ended: {}", peer, e);
                } else {
                    warn!("HTTP connection from {} failed: {}", peer, e);
                }
            }
        });
    }
}

/// Handle a single client connection.
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: ProxyContext,
) -> ProxyResult<()> {
    let mut conn = ProxyConnection::new(peer);
    let mut buf = BytesMut::with_capacity(4096);

    let sniffed = loop {
        if stream.read_buf(&mut buf).await? == 0 {
            if buf.is_empty() {
                return Err(ProxyError::PeerDisconnect);
            }
            break Sniffed::Other;
        }
        match sniff(&buf) {
            Sniffed::Partial if buf.len() < MAX_HEAD_SIZE => continue,
            Sniffed::Partial => break Sniffed::Other,
            sniffed => break sniffed,
        }
    };
    conn.transition(ConnectionState::Deciding);

    match sniffed {
        Sniffed::Connect {
            target,
            user_agent,
            head_len,
        } => {
            conn.transition(ConnectionState::Tunneling);
            let head = buf.split_off(head_len).freeze();
            tunnel_raw(stream, &target, head, user_agent, &ctx.audit).await
        }
        _ => {
            conn.transition(ConnectionState::Forwarding);
            let io = TokioIo::new(Rewind::new(stream, buf.freeze()));

            let service = service_fn(move |req: Request<Incoming>| {
                let ctx = ctx.clone();
                async move { proxy_request(req, ctx).await }
            });

            // Serve HTTP/1.1 with support for upgrades (needed for CONNECT).
            // No Date header, so a CONNECT reply stays byte-exact.
            http1::Builder::new()
                .preserve_header_case(true)
                .title_case_headers(true)
                .auto_date_header(false)
                .serve_connection(io, service)
                .with_upgrades()
                .await
                .map_err(ProxyError::from)
        }
    }
}

/// Process a single proxy request.
async fn proxy_request(
    req: Request<Incoming>,
    ctx: ProxyContext,
) -> ProxyResult<Response<ProxyBody>> {
    if req.method() == Method::CONNECT {
        handle_connect(req, ctx.audit).await
    } else {
        handle_http(req, ctx.audit).await
    }
}

//! Request handling for the HTTP/CONNECT forward proxy.
//!
//! Two request shapes are handled:
//!
//! - `CONNECT host:port`: connect upstream, answer
//!   `200 Connection Established`, then bridge raw bytes.
//! - Any other method: resolve the destination (see [`super::target`]),
//!   record it, and relay the request over one fresh upstream connection.
//!
//! A CONNECT that arrives as the first request on a connection is tunneled by
//! [`tunnel_raw`] directly on the socket so the status line is byte-exact.
//! A CONNECT on a kept-alive connection goes through hyper's upgrade path in
//! [`handle_connect`].

use super::error::{ProxyError, ProxyResult};
use super::target::{HTTPS_DEFAULT_PORT, resolve, split_host_port};
use super::tunnel::bridge;
use crate::telemetry::{AuditLog, LogEntry};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::client::conn::http1 as client_http1;
use hyper::header::{CONNECTION, CONTENT_TYPE, HOST, HeaderMap, HeaderValue, USER_AGENT};
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Status line written to the client once a CONNECT tunnel is up.
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

const CONNECT_FAILED: &[u8] =
    b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

const CONNECT_BAD_TARGET: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

/// Headers meant for the proxy itself; never forwarded upstream.
pub const PROXY_ONLY_HEADERS: &[&str] = &["proxy-connection", "proxy-authorization"];

/// Response body type shared by every handler.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Tunnel a CONNECT request read straight off the client socket.
///
/// `head` holds any bytes the client sent after the request head; they are
/// forwarded upstream before bridging starts.
pub async fn tunnel_raw<S>(
    mut client: S,
    target: &str,
    head: Bytes,
    user_agent: Option<String>,
    audit: &AuditLog,
) -> ProxyResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some((host, port)) = split_host_port(target, HTTPS_DEFAULT_PORT) else {
        client.write_all(CONNECT_BAD_TARGET).await?;
        return Err(ProxyError::UnresolvedDestination(target.to_string()));
    };

    let mut upstream = match connect_upstream(&host, port).await {
        Ok(upstream) => upstream,
        Err(e) => {
            client.write_all(CONNECT_FAILED).await?;
            return Err(e);
        }
    };

    audit.record(LogEntry::tunnel(host.clone(), user_agent));
    info!("CONNECT tunnel to {}:{}", host, port);

    client.write_all(CONNECT_ESTABLISHED).await?;
    if !head.is_empty() {
        upstream.write_all(&head).await?;
    }

    let stats = bridge(client, upstream).await?;
    debug!(
        sent = stats.client_to_upstream,
        received = stats.upstream_to_client,
        "Tunnel to {}:{} closed",
        host,
        port
    );
    Ok(())
}

/// Handle a CONNECT request through hyper's upgrade mechanism.
pub async fn handle_connect(
    req: Request<Incoming>,
    audit: Arc<AuditLog>,
) -> ProxyResult<Response<ProxyBody>> {
    let target = match req.uri().authority() {
        Some(authority) => authority.to_string(),
        None => req.uri().to_string(),
    };

    let Some((host, port)) = split_host_port(&target, HTTPS_DEFAULT_PORT) else {
        debug!("CONNECT with unusable target '{}'", target);
        return Ok(text_response(
            StatusCode::BAD_REQUEST,
            format!("Invalid CONNECT target '{}'", target),
        ));
    };

    let upstream = match connect_upstream(&host, port).await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!("{}", e);
            return Ok(upstream_failure(&e));
        }
    };

    audit.record(LogEntry::tunnel(host.clone(), user_agent(req.headers())));
    info!("CONNECT tunnel to {}:{}", host, port);

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => match bridge(TokioIo::new(upgraded), upstream).await {
                Ok(stats) => debug!(
                    sent = stats.client_to_upstream,
                    received = stats.upstream_to_client,
                    "Tunnel to {}:{} closed",
                    host,
                    port
                ),
                Err(e) => debug!("Tunnel to {}:{} ended: {}", host, port, e),
            },
            Err(e) => {
                warn!("HTTP upgrade failed for {}:{}: {}", host, port, e);
            }
        }
    });

    let mut response = Response::new(empty_body());
    response
        .extensions_mut()
        .insert(hyper::ext::ReasonPhrase::from_static(b"Connection Established"));
    Ok(response)
}

/// Handle a plain (non-CONNECT) proxy request.
///
/// The destination is recorded as soon as it is resolved, whatever the
/// upstream later does.
pub async fn handle_http(
    req: Request<Incoming>,
    audit: Arc<AuditLog>,
) -> ProxyResult<Response<ProxyBody>> {
    let Some(dest) = resolve(req.uri(), req.headers()) else {
        let err = ProxyError::UnresolvedDestination(req.uri().to_string());
        debug!("{}", err);
        return Ok(text_response(StatusCode::BAD_REQUEST, err.to_string()));
    };

    audit.record(LogEntry::new(
        req.method().as_str(),
        dest.host.clone(),
        dest.path.clone(),
        dest.protocol(),
        user_agent(req.headers()),
    ));
    debug!("{} {} via {}", req.method(), dest.path, dest.addr());

    let (mut parts, body) = req.into_parts();
    parts.uri = match dest.path.parse::<Uri>() {
        Ok(uri) => uri,
        Err(e) => {
            return Ok(text_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid request target '{}': {}", dest.path, e),
            ));
        }
    };
    strip_proxy_headers(&mut parts.headers);
    if !parts.headers.contains_key(HOST)
        && let Ok(value) = HeaderValue::from_str(&dest.host_header())
    {
        parts.headers.insert(HOST, value);
    }
    let outbound = Request::from_parts(parts, body);

    let stream = match connect_upstream(&dest.host, dest.port).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("{}", e);
            return Ok(upstream_failure(&e));
        }
    };

    match forward(stream, outbound, &dest.addr()).await {
        Ok(response) => Ok(response.map(|body| body.boxed())),
        Err(e) => {
            warn!("{}", e);
            Ok(upstream_failure(&e))
        }
    }
}

/// Send one request over a fresh upstream connection.
async fn forward(
    stream: TcpStream,
    req: Request<Incoming>,
    addr: &str,
) -> ProxyResult<Response<Incoming>> {
    let protocol_error = |e: hyper::Error| ProxyError::UpstreamProtocol {
        addr: addr.to_string(),
        message: e.to_string(),
    };

    let (mut sender, conn) = client_http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .handshake(TokioIo::new(stream))
        .await
        .map_err(protocol_error)?;

    let conn_addr = addr.to_string();
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Upstream connection to {} ended: {}", conn_addr, e);
        }
    });

    sender.send_request(req).await.map_err(protocol_error)
}

async fn connect_upstream(host: &str, port: u16) -> ProxyResult<TcpStream> {
    TcpStream::connect((host, port))
        .await
        .map_err(|e| ProxyError::UpstreamConnect {
            addr: format!("{}:{}", host, port),
            message: e.to_string(),
        })
}

/// Remove every header on the proxy-only deny-list.
pub fn strip_proxy_headers(headers: &mut HeaderMap) {
    for name in PROXY_ONLY_HEADERS {
        headers.remove(*name);
    }
}

/// The client's `User-Agent`, if present and valid UTF-8.
pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Create an empty response body.
fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Create a response body with content.
fn full_body(content: String) -> ProxyBody {
    Full::new(Bytes::from(content))
        .map_err(|never| match never {})
        .boxed()
}

/// Plain-text response that closes the connection afterwards.
fn text_response(status: StatusCode, message: String) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(message));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

fn upstream_failure(err: &ProxyError) -> Response<ProxyBody> {
    text_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, duplex};
    use tokio::net::TcpListener;

    #[test]
    fn test_strip_proxy_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("proxy-connection", HeaderValue::from_static("keep-alive"));
        headers.insert("Proxy-Authorization", HeaderValue::from_static("Basic eA=="));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        strip_proxy_headers(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("accept"));
    }

    #[test]
    fn test_user_agent() {
        let mut headers = HeaderMap::new();
        assert_eq!(user_agent(&headers), None);

        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8.5.0"));
        assert_eq!(user_agent(&headers), Some("curl/8.5.0".to_string()));
    }

    #[test]
    fn test_text_response() {
        let response = text_response(StatusCode::BAD_REQUEST, "nope".to_string());
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[CONNECTION], "close");
    }

    #[tokio::test]
    async fn test_tunnel_raw_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let audit = AuditLog::in_memory();
        let (client, mut client_peer) = duplex(1024);
        let target = format!("localhost:{}", port);

        let tunnel = tokio::spawn(async move {
            tunnel_raw(client, &target, Bytes::from_static(b"he"), None, &audit)
                .await
                .map(|()| audit.len())
        });

        let mut status = vec![0u8; CONNECT_ESTABLISHED.len()];
        client_peer.read_exact(&mut status).await.unwrap();
        assert_eq!(status, CONNECT_ESTABLISHED);

        client_peer.write_all(b"llo").await.unwrap();
        let mut echoed = [0u8; 5];
        client_peer.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello");

        drop(client_peer);
        assert_eq!(tunnel.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tunnel_raw_upstream_refused() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let audit = AuditLog::in_memory();
        let (client, mut client_peer) = duplex(1024);
        let target = format!("127.0.0.1:{}", port);

        let result = tunnel_raw(client, &target, Bytes::new(), None, &audit).await;
        assert!(matches!(result, Err(ProxyError::UpstreamConnect { .. })));
        assert!(audit.is_empty());

        let mut reply = Vec::new();
        client_peer.read_to_end(&mut reply).await.unwrap();
        assert!(reply.starts_with(b"HTTP/1.1 500 "));
    }
}

//! Unix socket transport for the control plane.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐  Unix Socket  ┌──────────────────────────┐
//! │     CLI subcommand       │←─────────────→│     Running proxy        │
//! │  ┌──────────────────┐    │    bincode    │  ┌──────────────────┐    │
//! │  │  ControlClient   │    │               │  │  ControlServer   │    │
//! │  └──────────────────┘    │               │  └──────────────────┘    │
//! └──────────────────────────┘               └──────────────────────────┘
//! ```
//!
//! # Message Framing
//!
//! Messages use length-prefixed bincode:
//! ```text
//! [4 bytes: message length (big-endian u32)]
//! [N bytes: bincode-serialized message]
//! ```

use super::protocol::{ControlRequest, ControlResponse};
use crate::telemetry::AuditLog;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// File name of the control socket inside the runtime directory.
pub const SOCKET_FILE_NAME: &str = "sni-audit-proxy.sock";

/// Maximum message size (16 MB should be plenty).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Errors from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,
    /// Message too large.
    #[error("Message too large: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),
}

/// Result type for socket operations.
pub type SocketResult<T> = Result<T, SocketError>;

/// Default control socket location: `$XDG_RUNTIME_DIR` or the temp dir.
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(SOCKET_FILE_NAME)
}

/// Control socket server run by the proxy process.
pub struct ControlServer {
    /// Option allows moving it out in run() since we implement Drop.
    listener: Option<StdUnixListener>,
    socket_path: PathBuf,
}

impl ControlServer {
    /// Bind a socket at `socket_path`, replacing a stale socket file.
    ///
    /// The socket is only accessible by the current user. Uses std's
    /// listener so it can be called outside of a tokio runtime.
    pub fn bind<P: AsRef<Path>>(socket_path: P) -> SocketResult<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }

        let listener = StdUnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;
        info!("Control socket listening on {:?}", socket_path);

        Ok(Self {
            listener: Some(listener),
            socket_path,
        })
    }

    /// Serve clients until the shutdown signal is received.
    pub async fn run(
        mut self,
        audit: Arc<AuditLog>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> SocketResult<()> {
        let std_listener = self
            .listener
            .take()
            .ok_or_else(|| io::Error::other("listener already consumed"))?;
        let listener = UnixListener::from_std(std_listener)?;

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            debug!("Control client connected");
                            let audit = audit.clone();
                            tokio::spawn(async move {
                                match serve_client(stream, &audit).await {
                                    Ok(()) | Err(SocketError::ConnectionClosed) => {}
                                    Err(e) => warn!("Control client error: {}", e),
                                }
                            });
                        }
                        Err(e) => {
                            warn!("Failed to accept control connection: {}", e);
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Control socket shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        if self.socket_path.exists()
            && let Err(e) = std::fs::remove_file(&self.socket_path)
        {
            warn!("Failed to remove socket file: {}", e);
        }
    }
}

/// Answer requests from one client until it disconnects.
async fn serve_client(mut stream: UnixStream, audit: &AuditLog) -> SocketResult<()> {
    loop {
        let request: ControlRequest = read_frame(&mut stream).await?;
        debug!("Control request: {}", request);
        let response = handle_request(audit, request);
        write_frame(&mut stream, &response).await?;
    }
}

/// Apply one control request to the audit log.
pub fn handle_request(audit: &AuditLog, request: ControlRequest) -> ControlResponse {
    match request {
        ControlRequest::Ping => ControlResponse::Pong,
        ControlRequest::Stats { top } => {
            ControlResponse::Stats(audit.compute_stats(top.unwrap_or(audit.top_hosts())))
        }
        ControlRequest::Export { path } => match audit.export(&path) {
            Ok(entries) => {
                info!("Exported {} audit entries to {:?}", entries, path);
                ControlResponse::Exported { path, entries }
            }
            Err(e) => ControlResponse::Error(e.to_string()),
        },
        ControlRequest::Clear => {
            let removed = audit.clear();
            info!("Cleared {} audit entries", removed);
            ControlResponse::Cleared { removed }
        }
    }
}

/// Client used by the CLI subcommands.
pub struct ControlClient {
    stream: UnixStream,
}

impl ControlClient {
    /// Connect to the socket server at the given path.
    pub async fn connect<P: AsRef<Path>>(socket_path: P) -> SocketResult<Self> {
        let socket_path = socket_path.as_ref();
        let stream = UnixStream::connect(socket_path).await?;
        debug!("Connected to control socket at {:?}", socket_path);
        Ok(Self { stream })
    }

    /// Send a request and wait for its response.
    pub async fn request(&mut self, request: &ControlRequest) -> SocketResult<ControlResponse> {
        write_frame(&mut self.stream, request).await?;
        read_frame(&mut self.stream).await
    }
}

/// Read one length-prefixed bincode message.
pub async fn read_frame<R, T>(reader: &mut R) -> SocketResult<T>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    // Read length prefix (4 bytes, big-endian u32)
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(SocketError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(SocketError::MessageTooLarge(len, MAX_MESSAGE_SIZE));
    }

    let mut buf = vec![0u8; len];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(bincode::deserialize(&buf)?),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(SocketError::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}

/// Write one length-prefixed bincode message.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> SocketResult<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let data = bincode::serialize(message)?;
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(SocketError::MessageTooLarge(data.len(), MAX_MESSAGE_SIZE));
    }

    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

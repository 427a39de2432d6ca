//! Byte-level tunnel plumbing shared by both proxies.
//!
//! [`bridge`] pumps bytes in both directions until either side finishes.
//! [`Rewind`] replays bytes the proxy already consumed while deciding what a
//! connection is, so the next reader sees the stream from its first byte.

use bytes::{Buf, Bytes};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::debug;

/// Byte counts moved by a finished bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Bytes copied from the client to the upstream.
    pub client_to_upstream: u64,
    /// Bytes copied from the upstream to the client.
    pub upstream_to_client: u64,
}

/// Copy bytes both ways between `client` and `upstream`.
///
/// Returns as soon as either direction reaches EOF or fails; the write halves
/// are then shut down so both peers observe the close. `tokio::io::copy`
/// awaits each write, so a slow reader on one side pauses reads on the other.
///
/// Both counters include bytes moved by the direction that was still open
/// when the other one finished.
pub async fn bridge<C, U>(client: C, upstream: U) -> io::Result<BridgeStats>
where
    C: AsyncRead + AsyncWrite,
    U: AsyncRead + AsyncWrite,
{
    let (mut client_read, client_write) = tokio::io::split(client);
    let (mut upstream_read, upstream_write) = tokio::io::split(upstream);
    let mut client_write = Counted::new(client_write);
    let mut upstream_write = Counted::new(upstream_write);

    let outcome = tokio::select! {
        result = tokio::io::copy(&mut client_read, &mut upstream_write) => {
            result.map(|n| debug!("Client->upstream copy finished after {} bytes", n))
        }
        result = tokio::io::copy(&mut upstream_read, &mut client_write) => {
            result.map(|n| debug!("Upstream->client copy finished after {} bytes", n))
        }
    };

    // Best effort: the peer may already be gone.
    let _ = upstream_write.shutdown().await;
    let _ = client_write.shutdown().await;

    outcome.map(|()| BridgeStats {
        client_to_upstream: upstream_write.written,
        upstream_to_client: client_write.written,
    })
}

/// Write half that counts the bytes its inner writer accepted.
struct Counted<W> {
    inner: W,
    written: u64,
}

impl<W> Counted<W> {
    fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for Counted<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            self.written += n as u64;
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Stream adapter that yields `prefix` before reading from `inner`.
///
/// Writes go straight to `inner`.
#[derive(Debug)]
pub struct Rewind<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> Rewind<S> {
    /// Wrap `inner`, replaying `prefix` first.
    pub fn new(inner: S, prefix: Bytes) -> Self {
        Self { prefix, inner }
    }

    /// Bytes not yet replayed.
    pub fn remaining_prefix(&self) -> &[u8] {
        &self.prefix
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Read once into a buffer of `capacity` bytes.
///
/// Returns the bytes read, which are empty if the peer closed before sending.
pub async fn read_first_chunk<S>(stream: &mut S, capacity: usize) -> io::Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; capacity];
    let n = stream.read(&mut buf).await?;
    buf.truncate(n);
    Ok(Bytes::from(buf))
}

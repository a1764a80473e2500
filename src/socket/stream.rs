//! Sockets the tunnel negotiation can drive.
//!
//! [`TunnelSocket`] is the non-blocking surface the negotiation needs: attempt
//! I/O without waiting, report liveness, and carry the "tunneled" annotation
//! once the proxy accepts. [`ProxySocket`] implements it over a Tokio
//! `TcpStream` and stays usable as an `AsyncRead + AsyncWrite` afterwards, so
//! a TLS handshake can run straight over it.

use bytes::{Buf, Bytes};
use std::fmt;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// A socket that supports non-blocking attempts and liveness reporting.
pub trait TunnelSocket: fmt::Debug {
    /// Write without blocking. `Err(WouldBlock)` means nothing was written.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Read without blocking. `Ok(0)` with a non-empty `buf` means end-of-stream.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// False once the handle is invalid or end-of-stream has been seen.
    fn is_connected(&self) -> bool;

    /// Annotate the socket as carrying an established tunnel. `early_data` is
    /// whatever the proxy sent past its response head.
    fn mark_tunneled(&mut self, early_data: Bytes);

    fn is_tunneled(&self) -> bool;
}

/// A TCP connection to an HTTP proxy.
#[derive(Debug)]
pub struct ProxySocket {
    inner: TcpStream,
    eof: bool,
    broken: bool,
    tunneled: bool,
    early_data: Bytes,
}

impl ProxySocket {
    pub fn new(inner: TcpStream) -> Self {
        Self {
            inner,
            eof: false,
            broken: false,
            tunneled: false,
            early_data: Bytes::new(),
        }
    }

    pub fn get_ref(&self) -> &TcpStream {
        &self.inner
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    /// Tunnel bytes that arrived with the proxy's response and have not been
    /// read yet.
    pub fn early_data(&self) -> &[u8] {
        &self.early_data
    }

    /// Split into the raw stream and any unread early tunnel bytes.
    pub fn into_parts(self) -> (TcpStream, Bytes) {
        (self.inner, self.early_data)
    }

    fn observe(&mut self, result: &io::Result<usize>) {
        if let Err(e) = result {
            if !matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) {
                self.broken = true;
            }
        }
    }
}

impl TunnelSocket for ProxySocket {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.inner.try_write(buf);
        self.observe(&result);
        result
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.inner.try_read(buf);
        if matches!(result, Ok(0)) && !buf.is_empty() {
            self.eof = true;
        }
        self.observe(&result);
        result
    }

    fn is_connected(&self) -> bool {
        // peer_addr() fails once the socket is disconnected
        !self.eof && !self.broken && self.inner.peer_addr().is_ok()
    }

    fn mark_tunneled(&mut self, early_data: Bytes) {
        self.tunneled = true;
        self.early_data = early_data;
    }

    fn is_tunneled(&self) -> bool {
        self.tunneled
    }
}

impl AsyncRead for ProxySocket {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.early_data.is_empty() {
            let n = this.early_data.len().min(buf.remaining());
            buf.put_slice(&this.early_data[..n]);
            this.early_data.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for ProxySocket {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

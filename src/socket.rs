//! Async datagram socket abstraction.
//!
//! [`Transport`] is the raw byte-level datagram channel: implemented for
//! `tokio::net::UdpSocket`, and by [`crate::simulator::Simulator`] for fault
//! injection.  [`Socket`] sits on top and speaks [`Segment`]s instead of
//! bytes.  All protocol logic lives elsewhere; this module owns only
//! datagram I/O.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Error;
use crate::segment::Segment;

/// Maximum UDP payload size.
const MAX_DATAGRAM: usize = 65_535;

/// An unreliable, unordered datagram channel.
pub trait Transport: Send + Sync {
    fn send_to(
        &self,
        buf: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Transport for UdpSocket {
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, dest).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// A segment-oriented datagram socket.
#[derive(Debug)]
pub struct Socket<T = UdpSocket> {
    /// Address this socket is bound to (filled in after the OS assigns an ephemeral port).
    pub local_addr: SocketAddr,
    inner: T,
    /// Receive buffer, reused across calls.
    buf: Mutex<Vec<u8>>,
}

impl Socket<UdpSocket> {
    /// Bind a new UDP socket to `local_addr`.
    ///
    /// Passing `127.0.0.1:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, Error> {
        let inner = UdpSocket::bind(local_addr).await?;
        Self::new(inner)
    }
}

impl<T: Transport> Socket<T> {
    /// Wrap an already-bound transport.
    pub fn new(inner: T) -> Result<Self, Error> {
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            buf: Mutex::new(vec![0u8; MAX_DATAGRAM]),
        })
    }

    /// Encode `segment` and send it as a single datagram to `dest`.
    pub async fn send_to(&self, segment: &Segment, dest: SocketAddr) -> Result<(), Error> {
        self.inner.send_to(&segment.encode(), dest).await?;
        Ok(())
    }

    /// Receive the next well-formed segment.
    ///
    /// Datagrams shorter than the header are logged and dropped; the wait
    /// continues.
    pub async fn recv_from(&self) -> Result<(Segment, SocketAddr), Error> {
        let mut buf = self.buf.lock().await;
        loop {
            let (n, addr) = self.inner.recv_from(&mut buf[..]).await?;
            match Segment::decode(&buf[..n]) {
                Ok(segment) => return Ok((segment, addr)),
                Err(e) => log::debug!("[socket] dropping datagram from {addr}: {e}"),
            }
        }
    }

    /// Like [`Socket::recv_from`], but gives up at `deadline`.
    ///
    /// Returns `Ok(None)` on timeout.  A deadline already in the past still
    /// returns a datagram that is ready immediately.
    pub async fn recv_until(
        &self,
        deadline: Instant,
    ) -> Result<Option<(Segment, SocketAddr)>, Error> {
        match tokio::time::timeout_at(deadline, self.recv_from()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }
}

//! Datagram transport abstraction.
//!
//! The protocol engine only needs a duplex datagram channel: send a frame to
//! an address, block for the next frame, close.  [`Transport`] captures that
//! contract; [`UdpTransport`] is the real thing over `tokio::net::UdpSocket`
//! and [`MemoryTransport`] is an in-process link for tests.
//!
//! All methods take `&self` so one transport can be shared between the task
//! that sends new data and the task that listens for ACKs.  After `close()`
//! every blocked or future `recv_from` returns [`TransportError::Closed`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// A duplex datagram channel bound to a local address.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `frame` as one datagram to `dest`.
    async fn send_to(&self, frame: &[u8], dest: SocketAddr) -> Result<(), TransportError>;

    /// Wait for the next datagram.  Returns `(bytes, source)`.
    async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr), TransportError>;

    /// Close the transport and wake every blocked receiver.
    fn close(&self);

    fn local_addr(&self) -> SocketAddr;
}

// ---------------------------------------------------------------------------
// UdpTransport
// ---------------------------------------------------------------------------

/// UDP socket transport.
#[derive(Debug)]
pub struct UdpTransport {
    local_addr: SocketAddr,
    inner: UdpSocket,
    max_datagram: usize,
    closed: CancellationToken,
}

impl UdpTransport {
    /// Bind a new socket to `local_addr`; port 0 picks an ephemeral port.
    ///
    /// Datagrams longer than `max_datagram` are truncated on receive.
    pub async fn bind(local_addr: SocketAddr, max_datagram: usize) -> Result<Self, TransportError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            max_datagram,
            closed: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, frame: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.inner.send_to(frame, dest).await?;
        Ok(())
    }

    async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        let mut buf = vec![0u8; self.max_datagram];
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            result = self.inner.recv_from(&mut buf) => {
                let (n, addr) = result?;
                buf.truncate(n);
                Ok((buf, addr))
            }
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

// ---------------------------------------------------------------------------
// MemoryTransport
// ---------------------------------------------------------------------------

type Datagram = (Vec<u8>, SocketAddr);

/// One end of an in-memory point-to-point link.
///
/// Frames addressed to anything but the peer are silently discarded, as UDP
/// would do for an unreachable host.
#[derive(Debug)]
pub struct MemoryTransport {
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Datagram>,
    inbound: Mutex<mpsc::UnboundedReceiver<Datagram>>,
    closed: CancellationToken,
    frames_sent: AtomicU64,
}

impl MemoryTransport {
    /// Two connected ends bound to `a` and `b`.
    pub fn pair(a: SocketAddr, b: SocketAddr) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Self::end(a, b, a_tx, a_rx), Self::end(b, a, b_tx, b_rx))
    }

    fn end(
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Datagram>,
        inbound: mpsc::UnboundedReceiver<Datagram>,
    ) -> Self {
        Self {
            local_addr,
            peer_addr,
            outbound,
            inbound: Mutex::new(inbound),
            closed: CancellationToken::new(),
            frames_sent: AtomicU64::new(0),
        }
    }

    /// Frames successfully handed to the link by this end.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_to(&self, frame: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if dest != self.peer_addr {
            log::trace!("[memory] {} → {dest}: no such peer, dropped", self.local_addr);
            return Ok(());
        }
        self.frames_sent.fetch_add(1, Ordering::SeqCst);
        // A vanished peer is indistinguishable from loss.
        let _ = self.outbound.send((frame.to_vec(), self.local_addr));
        Ok(())
    }

    async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        let mut inbound = tokio::select! {
            _ = self.closed.cancelled() => return Err(TransportError::Closed),
            guard = self.inbound.lock() => guard,
        };
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            next = inbound.recv() => next.ok_or(TransportError::Closed),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn addrs() -> (SocketAddr, SocketAddr) {
        (
            "127.0.0.1:1000".parse().unwrap(),
            "127.0.0.1:2000".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn memory_pair_delivers_both_ways() {
        let (a, b) = addrs();
        let (left, right) = MemoryTransport::pair(a, b);
        left.send_to(b"ping", b).await.unwrap();
        let (frame, from) = right.recv_from().await.unwrap();
        assert_eq!(frame, b"ping");
        assert_eq!(from, a);

        right.send_to(b"pong", a).await.unwrap();
        assert_eq!(left.recv_from().await.unwrap().0, b"pong");
        assert_eq!(left.frames_sent(), 1);
    }

    #[tokio::test]
    async fn memory_misaddressed_frame_is_dropped() {
        let (a, b) = addrs();
        let (left, right) = MemoryTransport::pair(a, b);
        left.send_to(b"lost", "127.0.0.1:9".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(left.frames_sent(), 0);
        let pending = tokio::time::timeout(Duration::from_millis(20), right.recv_from()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn close_wakes_blocked_receiver() {
        let (a, b) = addrs();
        let (left, _right) = MemoryTransport::pair(a, b);
        let left = Arc::new(left);
        let waiter = {
            let left = Arc::clone(&left);
            tokio::spawn(async move { left.recv_from().await })
        };
        tokio::task::yield_now().await;
        left.close();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(matches!(
            left.send_to(b"x", b).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn udp_loopback_roundtrip_and_close() {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = Arc::new(UdpTransport::bind(any, 1024).await.expect("bind a"));
        let b = UdpTransport::bind(any, 1024).await.expect("bind b");

        a.send_to(b"over udp", b.local_addr()).await.unwrap();
        let (frame, from) = b.recv_from().await.unwrap();
        assert_eq!(frame, b"over udp");
        assert_eq!(from, a.local_addr());

        let waiter = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.recv_from().await })
        };
        tokio::task::yield_now().await;
        a.close();
        assert!(matches!(waiter.await.unwrap(), Err(TransportError::Closed)));
    }
}

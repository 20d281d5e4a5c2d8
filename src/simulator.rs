//! Fault-injecting network layer for testing.
//!
//! Real networks drop, reorder, and duplicate packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`Simulator`] wraps any [`Transport`] and applies a configurable fault
//! model to every outbound datagram:
//!
//! | Fault        | Description                                               |
//! |--------------|-----------------------------------------------------------|
//! | Packet loss  | Drop the datagram with probability `loss_rate`.           |
//! | Reordering   | Hold the datagram back with probability `reorder_rate`;   |
//! |              | it is released right after the next datagram goes out.    |
//! | Duplication  | Send the datagram twice with probability `duplicate_rate`.|
//!
//! Receives pass through untouched.  The RNG is seeded, so a given sequence
//! of sends always meets the same faults.

use std::io;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::socket::Transport;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub loss_rate: f64,
    pub reorder_rate: f64,
    pub duplicate_rate: f64,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

/// Counters of what the simulator did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub sent: u64,
    pub dropped: u64,
    pub reordered: u64,
    pub duplicated: u64,
}

#[derive(Debug)]
struct FaultState {
    rng: StdRng,
    held: Option<(Vec<u8>, SocketAddr)>,
    stats: SimulatorStats,
}

/// A fault-injecting wrapper around a datagram transport.
#[derive(Debug)]
pub struct Simulator<T> {
    inner: T,
    config: SimulatorConfig,
    state: Mutex<FaultState>,
}

impl<T: Transport> Simulator<T> {
    pub fn new(inner: T, config: SimulatorConfig) -> Self {
        let state = FaultState {
            rng: StdRng::seed_from_u64(config.seed),
            held: None,
            stats: SimulatorStats::default(),
        };
        Self {
            inner,
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn stats(&self) -> SimulatorStats {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats
    }

    /// Decide what actually goes on the wire for one outbound datagram.
    fn plan(&self, buf: &[u8], dest: SocketAddr) -> Vec<(Vec<u8>, SocketAddr)> {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let released = st.held.take();
        let mut out = Vec::with_capacity(3);

        if st.rng.random_bool(self.config.loss_rate) {
            st.stats.dropped += 1;
            log::trace!("[sim] dropped {} bytes to {dest}", buf.len());
        } else if released.is_none() && st.rng.random_bool(self.config.reorder_rate) {
            st.stats.reordered += 1;
            st.held = Some((buf.to_vec(), dest));
        } else {
            out.push((buf.to_vec(), dest));
            if st.rng.random_bool(self.config.duplicate_rate) {
                st.stats.duplicated += 1;
                out.push((buf.to_vec(), dest));
            }
        }

        out.extend(released);
        st.stats.sent += out.len() as u64;
        out
    }
}

impl<T: Transport> Transport for Simulator<T> {
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        for (bytes, to) in self.plan(buf, dest) {
            self.inner.send_to(&bytes, to).await?;
        }
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    async fn sim(config: SimulatorConfig) -> (Simulator<UdpSocket>, UdpSocket) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (Simulator::new(a, config), b)
    }

    #[tokio::test]
    async fn default_config_passes_everything_through() {
        let (s, b) = sim(SimulatorConfig::default()).await;
        let dest = b.local_addr().unwrap();
        for i in 0..5u8 {
            s.send_to(&[i], dest).await.unwrap();
        }
        let mut buf = [0u8; 8];
        for i in 0..5u8 {
            let (n, _) = b.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], &[i]);
        }
        assert_eq!(s.stats().sent, 5);
    }

    #[tokio::test]
    async fn full_loss_drops_everything() {
        let (s, b) = sim(SimulatorConfig {
            loss_rate: 1.0,
            ..SimulatorConfig::default()
        })
        .await;
        let dest = b.local_addr().unwrap();
        for _ in 0..10 {
            s.send_to(b"x", dest).await.unwrap();
        }
        assert_eq!(s.stats().dropped, 10);
        assert_eq!(s.stats().sent, 0);
    }

    #[tokio::test]
    async fn full_duplication_sends_twice() {
        let (s, b) = sim(SimulatorConfig {
            duplicate_rate: 1.0,
            ..SimulatorConfig::default()
        })
        .await;
        s.send_to(b"dup", b.local_addr().unwrap()).await.unwrap();
        let mut buf = [0u8; 8];
        for _ in 0..2 {
            let (n, _) = b.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"dup");
        }
    }

    #[tokio::test]
    async fn reordered_datagram_follows_the_next_one() {
        let (s, b) = sim(SimulatorConfig {
            reorder_rate: 1.0,
            ..SimulatorConfig::default()
        })
        .await;
        let dest = b.local_addr().unwrap();
        s.send_to(b"first", dest).await.unwrap();
        s.send_to(b"second", dest).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"second");
        let (n, _) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"first");
    }

    #[tokio::test]
    async fn same_seed_same_faults() {
        let cfg = SimulatorConfig {
            loss_rate: 0.5,
            duplicate_rate: 0.3,
            seed: 42,
            ..SimulatorConfig::default()
        };
        let (s1, b1) = sim(cfg.clone()).await;
        let (s2, b2) = sim(cfg).await;
        for _ in 0..32 {
            s1.send_to(b"x", b1.local_addr().unwrap()).await.unwrap();
            s2.send_to(b"x", b2.local_addr().unwrap()).await.unwrap();
        }
        assert_eq!(s1.stats(), s2.stats());
        assert!(s1.stats().dropped > 0);
    }
}

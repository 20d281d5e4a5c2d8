//! Connection and teardown finite-state-machine types.
//!
//! Transitions live in [`crate::connection`] and [`crate::teardown`]; this
//! module only names the states so they can be logged, reported and
//! asserted on.

/// Lifecycle of one [`crate::connection::Connection`].
///
/// ```text
///  sender:    HandshakeSent ──ACK──▶ Established ──all data acked──▶ Closing ──▶ Closed
///  receiver:  Listening ──filename──▶ Established ──FIN──────────────▶ Closing ──▶ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Receiver waiting for the filename segment.
    #[default]
    Listening,
    /// Sender retransmitting the filename segment.
    HandshakeSent,
    /// Filename exchanged; data transfer in progress.
    Established,
    /// End-of-data seen or sent; teardown handshake running.
    Closing,
    Closed,
}

/// Progress of the two-sided close.
///
/// `LocalFinAcked` and `PeerFinSeen` are reached in either order; `Closed`
/// needs both.
///
/// ```text
///                    ┌──▶ LocalFinAcked ──┐
///  Idle ──▶ LocalFinSent                  ├──▶ Closed
///                    └──▶ PeerFinSeen ────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TeardownState {
    #[default]
    Idle,
    /// Our FIN is out; nothing heard yet.
    LocalFinSent,
    /// Our FIN was acknowledged; waiting for the peer's FIN.
    LocalFinAcked,
    /// The peer's FIN was seen and acknowledged; ours is still unacknowledged.
    PeerFinSeen,
    Closed,
}

impl TeardownState {
    pub fn from_flags(fin_sent: bool, local_fin_acked: bool, peer_fin_seen: bool) -> Self {
        match (fin_sent, local_fin_acked, peer_fin_seen) {
            (_, true, true) => TeardownState::Closed,
            (_, true, false) => TeardownState::LocalFinAcked,
            (_, false, true) => TeardownState::PeerFinSeen,
            (true, false, false) => TeardownState::LocalFinSent,
            (false, false, false) => TeardownState::Idle,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::fmt::Display for TeardownState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

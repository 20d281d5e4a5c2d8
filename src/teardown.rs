//! Two-sided close handshake.
//!
//! Each peer sends its own end-of-data `FIN` and is done only when
//! 1. its FIN has been acknowledged (a `FIN_ACK` whose `ack_num` equals the
//!    FIN's `seq_num`), and
//! 2. it has seen, and answered with a `FIN_ACK`, the peer's FIN.
//!
//! The **initiator** (the data sender) sends first.  The **responder** (the
//! data receiver) answers the initiator's FIN immediately and then sends its
//! own.  Because the responder only ever sends its FIN after seeing the
//! initiator's, a responder FIN reaching the initiator also proves the
//! initiator's FIN arrived; the initiator treats it as the acknowledgement.
//!
//! A peer FIN that arrives again (our FIN_ACK was lost) is answered again,
//! at any point, including after `Closed`.
//!
//! Retries are bounded.  Exhausting them yields
//! [`Error::TeardownIncomplete`], which callers log and otherwise ignore: the
//! data itself was already confirmed.

use crate::error::Error;
use crate::segment::{Kind, Segment};
use crate::state::TeardownState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug)]
pub struct Teardown {
    role: Role,
    local_seq: u32,
    fin: Segment,
    fin_sent: bool,
    local_fin_acked: bool,
    peer_fin: Option<u32>,
    transmissions: u32,
    idle_timeouts: u32,
    retry_limit: u32,
}

impl Teardown {
    /// Close started by this side.  The FIN goes out at `local_seq`.
    pub fn initiate(local_seq: u32, ack_num: u32, retry_limit: u32) -> Self {
        Self {
            role: Role::Initiator,
            local_seq,
            fin: Segment::fin(local_seq, ack_num),
            fin_sent: false,
            local_fin_acked: false,
            peer_fin: None,
            transmissions: 0,
            idle_timeouts: 0,
            retry_limit,
        }
    }

    /// Close answering the peer's FIN at `peer_fin_seq`.
    ///
    /// Returns the state machine and the FIN_ACK to send right away.
    pub fn respond(
        peer_fin_seq: u32,
        local_seq: u32,
        ack_num: u32,
        retry_limit: u32,
    ) -> (Self, Segment) {
        let teardown = Self {
            role: Role::Responder,
            local_seq,
            fin: Segment::fin(local_seq, ack_num),
            fin_sent: false,
            local_fin_acked: false,
            peer_fin: Some(peer_fin_seq),
            transmissions: 0,
            idle_timeouts: 0,
            retry_limit,
        };
        (teardown, Segment::fin_ack(local_seq, peer_fin_seq))
    }

    /// FIN transmissions so far, the first one included.
    pub fn transmissions(&self) -> u32 {
        self.transmissions
    }

    pub fn state(&self) -> TeardownState {
        TeardownState::from_flags(self.fin_sent, self.local_fin_acked, self.peer_fin.is_some())
    }

    pub fn is_closed(&self) -> bool {
        self.state() == TeardownState::Closed
    }

    /// First FIN transmission.
    pub fn start(&mut self) -> Segment {
        self.fin_sent = true;
        self.transmissions = 1;
        self.fin.clone()
    }

    /// Feed an inbound segment.  Returns a FIN_ACK to send when the segment
    /// was a peer FIN.
    pub fn on_segment(&mut self, segment: &Segment) -> Option<Segment> {
        match segment.kind() {
            Kind::FinAck if self.fin_sent && segment.ack_num() == self.fin.seq_num() => {
                if !self.local_fin_acked {
                    log::debug!("[teardown] ← FIN_ACK ack={}", segment.ack_num());
                }
                self.local_fin_acked = true;
                self.idle_timeouts = 0;
                None
            }
            Kind::Fin => {
                if self.peer_fin.is_none() {
                    log::debug!("[teardown] ← peer FIN seq={}", segment.seq_num());
                    self.idle_timeouts = 0;
                }
                self.peer_fin = Some(segment.seq_num());
                if self.role == Role::Initiator && self.fin_sent && !self.local_fin_acked {
                    log::debug!("[teardown] peer FIN implies ours was received");
                    self.local_fin_acked = true;
                }
                Some(Segment::fin_ack(self.local_seq, segment.seq_num()))
            }
            _ => None,
        }
    }

    /// Retry interval elapsed without progress.
    ///
    /// Returns the FIN to retransmit if ours is still unacknowledged, or
    /// `Ok(None)` while waiting on the peer's FIN.
    pub fn on_timeout(&mut self) -> Result<Option<Segment>, Error> {
        if self.is_closed() {
            return Ok(None);
        }
        if !self.local_fin_acked {
            if self.transmissions >= self.retry_limit {
                return Err(Error::TeardownIncomplete {
                    attempts: self.transmissions,
                });
            }
            self.transmissions += 1;
            return Ok(Some(self.fin.clone()));
        }
        self.idle_timeouts += 1;
        if self.idle_timeouts >= self.retry_limit {
            return Err(Error::TeardownIncomplete {
                attempts: self.idle_timeouts,
            });
        }
        Ok(None)
    }
}

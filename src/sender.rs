//! Sliding-window send-side state machine.
//!
//! [`SenderWindow`] splits a byte payload into fragments and keeps up to
//! `window_size` of them in flight at once.  Unlike Go-Back-N, only the
//! segments that actually need it are re-sent: a segment whose own timer has
//! expired, or the segment a run of stale ACKs keeps pointing at.
//!
//! # Protocol contract
//!
//! - Sequence space is the byte offset.  Fragment `i` is sent at
//!   `start_seq + (bytes in fragments 0..i)`.
//! - ACKs are **cumulative**: `ack_num = K` means the receiver holds every
//!   byte before `K`.
//! - An ACK at or below the highest one seen is *stale*.  `dup_threshold`
//!   stale ACKs for the same value resend the pending segment that starts at
//!   that value (the peer keeps asking for it).
//! - A pending segment unacknowledged for `segment_timeout` is resent on the
//!   next [`SenderWindow::on_tick`].
//! - No fragment's bytes ever equal a control marker: such a fragment is split
//!   in two so that file content can never be read as `FIN`/`ACK`/`FIN_ACK`.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::Error;
use crate::segment::{markers, Segment};
use crate::timer::DeadlineQueue;

/// Split `data` into byte ranges of at most `fragment_size` bytes.
///
/// A range whose bytes would equal a control marker is split into two shorter
/// ranges (`len - 1` and `1`), neither of which can be a marker.
pub fn fragment(data: &[u8], fragment_size: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::with_capacity(data.len() / fragment_size.max(1) + 1);
    let mut start = 0;
    while start < data.len() {
        let end = (start + fragment_size).min(data.len());
        if markers::is_marker(&data[start..end]) {
            ranges.push(start..end - 1);
            ranges.push(end - 1..end);
        } else {
            ranges.push(start..end);
        }
        start = end;
    }
    ranges
}

/// A segment that has been sent but not yet covered by a cumulative ACK.
#[derive(Debug, Clone)]
struct PendingSegment {
    segment: Segment,
    /// Time of the most recent (re)transmission.
    last_sent_at: Instant,
    /// Total number of transmissions (1 = first send).
    tx_count: u32,
}

/// What an inbound ACK did to the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// The window slid forward by `acked` fragments.
    Advanced { acked: usize },
    /// Stale ACK counted; `count` repeats of this value so far.
    Duplicate { count: u32 },
    /// Stale ACK hit the threshold: resend this segment.
    FastRetransmit(Segment),
    /// ACK for bytes never sent.
    Ignored,
}

/// Send-side state for one transfer.
///
/// ```text
///   base           next_to_send
///     │                 │
///  ───┼─────────────────┼──────────────────▶ fragments
///     │ <── in flight ─▶│ <── sendable ───▶
/// ```
#[derive(Debug)]
pub struct SenderWindow {
    data: Vec<u8>,
    fragments: Vec<Range<usize>>,
    /// Absolute end offset of every fragment; searched to map an ACK to `base`.
    ends: Vec<u32>,

    base: usize,
    next_to_send: usize,
    current_seq: u32,
    expected_ack: u32,

    pending: BTreeMap<u32, PendingSegment>,
    dup_acks: HashMap<u32, u32>,
    deadlines: DeadlineQueue,

    window_size: usize,
    segment_timeout: Duration,
    dup_threshold: u32,

    retransmissions: u64,
    fast_retransmits: u64,
}

impl SenderWindow {
    /// Create a window over `data`.
    ///
    /// `start_seq` and `expected_ack` come from the handshake: the first data
    /// byte is sent at `start_seq`, and `expected_ack` is the cumulative ACK
    /// the peer already confirmed.
    pub fn new(
        start_seq: u32,
        expected_ack: u32,
        data: Vec<u8>,
        config: &Config,
    ) -> Result<Self, Error> {
        if u64::from(start_seq) + data.len() as u64 > u64::from(u32::MAX) {
            return Err(Error::PayloadTooLarge { len: data.len() });
        }
        let fragments = fragment(&data, config.fragment_size);
        let ends = fragments
            .iter()
            .map(|r| start_seq + r.end as u32)
            .collect();

        Ok(Self {
            data,
            fragments,
            ends,
            base: 0,
            next_to_send: 0,
            current_seq: start_seq,
            expected_ack,
            pending: BTreeMap::new(),
            dup_acks: HashMap::new(),
            deadlines: DeadlineQueue::new(),
            window_size: config.window_size,
            segment_timeout: config.segment_timeout,
            dup_threshold: config.dup_threshold,
            retransmissions: 0,
            fast_retransmits: 0,
        })
    }

    pub fn total_fragments(&self) -> usize {
        self.fragments.len()
    }

    /// Index of the first fragment not yet covered by the cumulative ACK.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Index of the next fragment that has never been sent.
    pub fn next_to_send(&self) -> usize {
        self.next_to_send
    }

    /// Next byte offset to assign to a new fragment.
    pub fn current_seq(&self) -> u32 {
        self.current_seq
    }

    /// Highest cumulative ACK observed.
    pub fn expected_ack(&self) -> u32 {
        self.expected_ack
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    pub fn fast_retransmits(&self) -> u64 {
        self.fast_retransmits
    }

    /// `true` once the latest cumulative ACK covers every fragment.
    pub fn is_complete(&self) -> bool {
        self.base >= self.fragments.len()
    }

    /// Emit every fragment the window currently has room for.
    pub fn poll_transmit(&mut self, now: Instant) -> Vec<Segment> {
        let mut out = Vec::new();
        while self.next_to_send < self.base + self.window_size
            && self.next_to_send < self.fragments.len()
        {
            let range = self.fragments[self.next_to_send].clone();
            let len = range.len() as u32;
            let segment = Segment::new(self.current_seq, 0, self.data[range].to_vec());

            self.deadlines
                .schedule(self.current_seq, now + self.segment_timeout);
            self.pending.insert(
                self.current_seq,
                PendingSegment {
                    segment: segment.clone(),
                    last_sent_at: now,
                    tx_count: 1,
                },
            );
            self.current_seq += len;
            self.next_to_send += 1;
            out.push(segment);
        }
        out
    }

    /// Process a cumulative ACK value from the peer.
    pub fn on_ack(&mut self, ack_num: u32, now: Instant) -> AckOutcome {
        if ack_num > self.expected_ack {
            if ack_num > self.current_seq {
                log::debug!(
                    "[send] ignoring ACK {} beyond next seq {}",
                    ack_num,
                    self.current_seq
                );
                return AckOutcome::Ignored;
            }

            // Everything starting below ack_num is covered.
            self.pending = self.pending.split_off(&ack_num);
            let old_base = self.base;
            self.base = self.ends.partition_point(|&end| end <= ack_num);
            self.expected_ack = ack_num;
            self.dup_acks.retain(|&value, _| value >= ack_num);
            return AckOutcome::Advanced {
                acked: self.base - old_base,
            };
        }

        let count = {
            let c = self.dup_acks.entry(ack_num).or_insert(0);
            *c += 1;
            *c
        };
        if count < self.dup_threshold {
            return AckOutcome::Duplicate { count };
        }

        self.dup_acks.remove(&ack_num);
        match self.pending.get_mut(&ack_num) {
            Some(p) => {
                p.last_sent_at = now;
                p.tx_count += 1;
                let segment = p.segment.clone();
                self.deadlines.schedule(ack_num, now + self.segment_timeout);
                self.fast_retransmits += 1;
                AckOutcome::FastRetransmit(segment)
            }
            None => AckOutcome::Duplicate { count },
        }
    }

    /// Resend every pending segment whose timer has run out.
    pub fn on_tick(&mut self, now: Instant) -> Vec<Segment> {
        let mut out = Vec::new();
        for seq in self.deadlines.pop_expired(now) {
            let Some(p) = self.pending.get_mut(&seq) else {
                continue;
            };
            // Re-sent since this deadline was scheduled; a later one exists.
            if now.duration_since(p.last_sent_at) < self.segment_timeout {
                continue;
            }
            p.last_sent_at = now;
            p.tx_count += 1;
            log::trace!("[send] seq={} timed out, transmission #{}", seq, p.tx_count);
            out.push(p.segment.clone());
            self.deadlines.schedule(seq, now + self.segment_timeout);
            self.retransmissions += 1;
        }
        out
    }

    /// Earliest moment a pending segment needs attention, if any.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some((deadline, seq)) = self.deadlines.peek() {
            let live = self
                .pending
                .get(&seq)
                .is_some_and(|p| deadline >= p.last_sent_at + self.segment_timeout);
            if live {
                return Some(deadline);
            }
            self.deadlines.pop();
        }
        None
    }
}

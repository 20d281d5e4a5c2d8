//! Receive-side reassembly state machine.
//!
//! [`ReceiverReorder`] turns a lossy, duplicated, reordered stream of data
//! segments into the exact original byte stream:
//!
//! - A segment at `expected_offset` is written to the sink straight away,
//!   followed by every buffered segment that has become contiguous.
//! - A segment ahead of `expected_offset` is parked in a reorder buffer keyed
//!   by its offset.
//! - A segment behind `expected_offset` has already been delivered; it means
//!   our ACK for it was probably lost, so the current cumulative ACK is sent
//!   again.
//!
//! Every reaction yields the ACK segments the caller should transmit.  This
//! module performs no socket I/O; the sink is any [`std::io::Write`].

use std::collections::BTreeMap;
use std::io::Write;

use crate::error::Error;
use crate::segment::{Kind, Segment};

/// Duplicate-segment counters kept at most; oldest offsets go first.
pub const MAX_TRACKED_DUPLICATES: usize = 64;

/// Result of feeding one segment to the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEvent {
    /// In-order data written to the sink.  One ACK per delivered segment
    /// (the arriving one first, then each drained buffer entry).
    Delivered { bytes: usize, acks: Vec<Segment> },
    /// Ahead of a gap; buffered.  The ACK re-states what is still missing.
    Buffered { ack: Segment },
    /// Already delivered.  `escalated` is set when the duplicate count hit
    /// the threshold (and was reset).
    Duplicate { ack: Segment, escalated: bool },
    /// The peer signalled end-of-data at `fin_seq`.
    EndOfData { fin_seq: u32 },
    /// Segment with no meaning in the data phase (stray ACK / FIN_ACK).
    Ignored,
}

impl ReceiveEvent {
    /// ACK segments to transmit in response.
    pub fn acks(&self) -> &[Segment] {
        match self {
            ReceiveEvent::Delivered { acks, .. } => acks,
            ReceiveEvent::Buffered { ack } | ReceiveEvent::Duplicate { ack, .. } => {
                std::slice::from_ref(ack)
            }
            ReceiveEvent::EndOfData { .. } | ReceiveEvent::Ignored => &[],
        }
    }
}

/// Summary of the residual flush at end-of-data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Residual {
    /// Buffered segments written despite never becoming contiguous.
    pub segments: usize,
    pub bytes: usize,
}

/// Receive-side state for one transfer.
#[derive(Debug)]
pub struct ReceiverReorder {
    expected_offset: u32,
    buffer: BTreeMap<u32, Vec<u8>>,
    duplicates: BTreeMap<u32, u32>,
    dup_threshold: u32,
    delivered: u64,
}

impl ReceiverReorder {
    /// `expected_offset` is the first data offset, as pinned by the handshake.
    pub fn new(expected_offset: u32, dup_threshold: u32) -> Self {
        Self {
            expected_offset,
            buffer: BTreeMap::new(),
            duplicates: BTreeMap::new(),
            dup_threshold,
            delivered: 0,
        }
    }

    /// Next contiguous byte offset expected (the cumulative ACK value).
    pub fn expected_offset(&self) -> u32 {
        self.expected_offset
    }

    /// Bytes written to the sink so far, residual flush included.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// The cumulative ACK for the current state.
    pub fn ack_segment(&self) -> Segment {
        Segment::ack(0, self.expected_offset)
    }

    /// Process one inbound segment, writing any newly contiguous bytes to `sink`.
    pub fn on_segment<W: Write>(
        &mut self,
        segment: &Segment,
        sink: &mut W,
    ) -> Result<ReceiveEvent, Error> {
        match segment.kind() {
            Kind::Fin => {
                return Ok(ReceiveEvent::EndOfData {
                    fin_seq: segment.seq_num(),
                })
            }
            Kind::Ack | Kind::FinAck => return Ok(ReceiveEvent::Ignored),
            Kind::Data => {}
        }

        let seq = segment.seq_num();
        if seq == self.expected_offset {
            let mut bytes = self.deliver(segment.payload(), sink)?;
            let mut acks = vec![self.ack_segment()];
            while let Some(payload) = self.take_contiguous() {
                bytes += self.deliver(&payload, sink)?;
                acks.push(self.ack_segment());
            }
            Ok(ReceiveEvent::Delivered { bytes, acks })
        } else if seq > self.expected_offset {
            self.buffer.insert(seq, segment.payload().to_vec());
            Ok(ReceiveEvent::Buffered {
                ack: self.ack_segment(),
            })
        } else {
            let escalated = self.count_duplicate(seq);
            if escalated {
                log::debug!(
                    "[recv] seq={} repeated {} times; re-acking {}",
                    seq,
                    self.dup_threshold,
                    self.expected_offset
                );
            }
            Ok(ReceiveEvent::Duplicate {
                ack: self.ack_segment(),
                escalated,
            })
        }
    }

    /// Write every still-buffered segment in ascending offset order.
    ///
    /// Called once end-of-data has been seen.  If entries remain they never
    /// became contiguous, so the sink will contain a gap.
    pub fn flush_residual<W: Write>(&mut self, sink: &mut W) -> Result<Residual, Error> {
        let mut residual = Residual::default();
        for (_, payload) in std::mem::take(&mut self.buffer) {
            sink.write_all(&payload).map_err(Error::Sink)?;
            self.delivered += payload.len() as u64;
            residual.segments += 1;
            residual.bytes += payload.len();
        }
        Ok(residual)
    }

    fn deliver<W: Write>(&mut self, payload: &[u8], sink: &mut W) -> Result<usize, Error> {
        sink.write_all(payload).map_err(Error::Sink)?;
        self.expected_offset = self.expected_offset.wrapping_add(payload.len() as u32);
        self.delivered += payload.len() as u64;
        Ok(payload.len())
    }

    /// Pop the buffered entry at `expected_offset`, discarding any entry that
    /// now lies entirely behind it.
    fn take_contiguous(&mut self) -> Option<Vec<u8>> {
        while let Some(entry) = self.buffer.first_entry() {
            if *entry.key() == self.expected_offset {
                return Some(entry.remove());
            }
            if *entry.key() > self.expected_offset {
                return None;
            }
            entry.remove();
        }
        None
    }

    /// Returns `true` when this duplicate reached the threshold.
    fn count_duplicate(&mut self, seq: u32) -> bool {
        let count = {
            let c = self.duplicates.entry(seq).or_insert(0);
            *c += 1;
            *c
        };
        if count >= self.dup_threshold {
            self.duplicates.remove(&seq);
            return true;
        }
        while self.duplicates.len() > MAX_TRACKED_DUPLICATES {
            self.duplicates.pop_first();
        }
        false
    }
}

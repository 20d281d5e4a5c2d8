//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Segment`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (two header fields, then payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`], rejecting
//!   datagrams too short to carry a header.
//! - Classifying a decoded segment into a [`Kind`].
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! There is no length field and no flag bits: the payload runs to the end of
//! the datagram, and control meaning is carried by the payload itself (one of
//! the literal [`markers`]).  A data chunk whose bytes equal a marker would be
//! indistinguishable from control on the wire; the sender's fragmenter makes
//! sure it never emits one (see [`crate::sender`]).

use crate::error::Error;

/// Literal control payloads.
pub mod markers {
    /// End of data from the sending peer.
    pub const FIN: &[u8] = b"FIN";
    /// Acknowledges a peer's [`FIN`].
    pub const FIN_ACK: &[u8] = b"FIN_ACK";
    /// Explicit acknowledgement (handshake reply).  Pure data ACKs use an empty payload.
    pub const ACK: &[u8] = b"ACK";

    /// `true` when `payload` would be read as control on the wire.
    pub fn is_marker(payload: &[u8]) -> bool {
        payload == FIN || payload == FIN_ACK || payload == ACK
    }
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 8;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;

/// What a segment means, derived from its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// File content (or, during the handshake, the filename).
    Data,
    /// Cumulative acknowledgement: empty payload or the `"ACK"` marker.
    Ack,
    /// End-of-data signal.
    Fin,
    /// Acknowledgement of a peer's end-of-data signal.
    FinAck,
}

/// One protocol datagram: header fields + payload bytes.
///
/// Immutable once built; construct with [`Segment::new`] or one of the
/// control helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    seq_num: u32,
    ack_num: u32,
    payload: Vec<u8>,
}

impl Segment {
    pub fn new(seq_num: u32, ack_num: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            seq_num,
            ack_num,
            payload: payload.into(),
        }
    }

    /// Pure cumulative ACK: `ack_num` is the next byte the sender of this
    /// segment expects.
    pub fn ack(seq_num: u32, ack_num: u32) -> Self {
        Self::new(seq_num, ack_num, Vec::new())
    }

    /// End-of-data control segment at `seq_num`.
    pub fn fin(seq_num: u32, ack_num: u32) -> Self {
        Self::new(seq_num, ack_num, markers::FIN)
    }

    /// Acknowledges the peer FIN that was sent at `fin_seq`.
    pub fn fin_ack(seq_num: u32, fin_seq: u32) -> Self {
        Self::new(seq_num, fin_seq, markers::FIN_ACK)
    }

    pub fn seq_num(&self) -> u32 {
        self.seq_num
    }

    pub fn ack_num(&self) -> u32 {
        self.ack_num
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Offset of the byte after this segment's payload.
    pub fn end_seq(&self) -> u32 {
        self.seq_num.wrapping_add(self.payload.len() as u32)
    }

    /// Classify this segment by its payload.
    pub fn kind(&self) -> Kind {
        match self.payload.as_slice() {
            b"" => Kind::Ack,
            p if p == markers::ACK => Kind::Ack,
            p if p == markers::FIN => Kind::Fin,
            p if p == markers::FIN_ACK => Kind::FinAck,
            _ => Kind::Data,
        }
    }

    /// Serialise this segment into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq_num.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack_num.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Segment`] from a raw datagram.
    ///
    /// Returns [`Error::MalformedSegment`] if `buf` is shorter than
    /// [`HEADER_LEN`].  The payload is not interpreted.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_LEN {
            return Err(Error::MalformedSegment { len: buf.len() });
        }
        let (header, payload) = buf.split_at(HEADER_LEN);
        let (seq, ack) = header.split_at(OFF_ACK);
        Ok(Self {
            seq_num: u32::from_be_bytes([seq[0], seq[1], seq[2], seq[3]]),
            ack_num: u32::from_be_bytes([ack[0], ack[1], ack[2], ack[3]]),
            payload: payload.to_vec(),
        })
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} seq={} ack={} len={}",
            self.kind(),
            self.seq_num,
            self.ack_num,
            self.payload.len()
        )
    }
}

//! Crate-wide error type.
//!
//! Data-plane loss (missing ACKs, missing or reordered segments) never shows up
//! here; it is absorbed by retransmission and reordering.  Only conditions that
//! end a phase are represented.

use std::io;

use thiserror::Error;

use crate::segment::HEADER_LEN;
use crate::state::ConnectionState;

#[derive(Debug, Error)]
pub enum Error {
    /// Datagram shorter than the fixed header.  Discarded by the socket layer.
    #[error("malformed segment: {len} bytes is shorter than the {}-byte header", HEADER_LEN)]
    MalformedSegment { len: usize },

    /// The filename exchange was never acknowledged.
    #[error("handshake timed out after {attempts} attempts")]
    HandshakeTimeout { attempts: u32 },

    /// The transport reported that the peer went away.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// External interrupt (Ctrl-C).
    #[error("interrupted by user")]
    UserAbort,

    /// Teardown retry budget exhausted.  Logged, never fatal.
    #[error("teardown incomplete after {attempts} attempts")]
    TeardownIncomplete { attempts: u32 },

    /// The receiver heard nothing for too long while waiting for data.
    #[error("peer unresponsive for {timeouts} consecutive read timeouts")]
    PeerUnresponsive { timeouts: u32 },

    /// End-of-data arrived while out-of-order segments were still waiting on a gap.
    #[error("transfer incomplete: {segments} buffered segment(s) never became contiguous")]
    IncompleteTransfer { segments: usize },

    /// The operation does not fit the connection's role or current state.
    #[error("operation not allowed in state {0}")]
    BadState(ConnectionState),

    #[error("invalid filename {0:?}")]
    InvalidFilename(String),

    #[error("payload of {len} bytes does not fit the 32-bit sequence space")]
    PayloadTooLarge { len: usize },

    #[error("invalid configuration: {0}")]
    Config(&'static str),

    #[error("sink write failed: {0}")]
    Sink(#[source] io::Error),

    #[error("socket I/O error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused => {
                Error::ConnectionReset
            }
            _ => Error::Io(err),
        }
    }
}

impl Error {
    /// `true` for outcomes that must abort the whole session.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::MalformedSegment { .. } | Error::TeardownIncomplete { .. }
        )
    }
}

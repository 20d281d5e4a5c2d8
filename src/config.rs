//! Protocol tunables.
//!
//! The core never loads configuration itself; callers build a [`Config`]
//! (the CLI maps each field to a flag) and hand it to a
//! [`crate::connection::Connection`].

use std::time::Duration;

use crate::error::Error;
use crate::segment::HEADER_LEN;

/// Largest payload that still fits a single UDP datagram.
pub const MAX_FRAGMENT_SIZE: usize = 65_535 - HEADER_LEN;

/// What to do with reorder-buffer entries that are still waiting on a gap
/// when end-of-data arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResidualPolicy {
    /// Write them to the sink in ascending offset order and warn.
    #[default]
    Flush,
    /// Fail the transfer with [`Error::IncompleteTransfer`].
    Reject,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum payload bytes per data segment.
    pub fragment_size: usize,
    /// Maximum number of unacknowledged fragments in flight.
    pub window_size: usize,
    /// A pending segment is retransmitted after this long without an ACK.
    pub segment_timeout: Duration,
    /// Upper bound on a single receive wait.
    pub read_timeout: Duration,
    /// Repeated stale ACKs / duplicate segments needed to trigger a corrective resend.
    pub dup_threshold: u32,
    /// Retry bound for the handshake and the teardown.
    pub retry_limit: u32,
    /// Retransmit interval for the handshake and the teardown.
    pub retry_interval: Duration,
    /// How long the closing initiator keeps answering retransmitted peer FINs.
    pub linger: Duration,
    /// Consecutive idle read timeouts after which the receiver gives up.
    /// `None` waits forever.
    pub idle_limit: Option<u32>,
    pub residual: ResidualPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fragment_size: 1024,
            window_size: 8,
            segment_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(100),
            dup_threshold: 3,
            retry_limit: 20,
            retry_interval: Duration::from_millis(500),
            linger: Duration::from_secs(1),
            idle_limit: Some(300),
            residual: ResidualPolicy::Flush,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if self.fragment_size == 0 {
            return Err(Error::Config("fragment_size must be at least 1"));
        }
        if self.fragment_size > MAX_FRAGMENT_SIZE {
            return Err(Error::Config("fragment_size does not fit a UDP datagram"));
        }
        if self.window_size == 0 {
            return Err(Error::Config("window_size must be at least 1"));
        }
        if self.dup_threshold == 0 {
            return Err(Error::Config("dup_threshold must be at least 1"));
        }
        if self.retry_limit == 0 {
            return Err(Error::Config("retry_limit must be at least 1"));
        }
        if self.segment_timeout.is_zero()
            || self.read_timeout.is_zero()
            || self.retry_interval.is_zero()
        {
            return Err(Error::Config("timeouts must be non-zero"));
        }
        if self.idle_limit == Some(0) {
            return Err(Error::Config("idle_limit must be at least 1 when set"));
        }
        Ok(())
    }
}

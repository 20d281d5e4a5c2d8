//! One-call transfer entry points.
//!
//! [`send_file`] and [`receive_file`] run a whole session (handshake, data
//! phase, teardown) on a [`Connection`] and summarise it in a report.  The
//! payload is supplied in memory and the sink is any [`Write`]; touching the
//! filesystem is the caller's business.

use std::io::{self, Write};
use std::net::SocketAddr;

use crate::config::Config;
use crate::connection::Connection;
use crate::error::Error;
use crate::receiver::Residual;
use crate::socket::{Socket, Transport};
use crate::state::TeardownState;

/// Outcome of a successful [`send_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub peer: SocketAddr,
    pub filename: String,
    pub bytes: u64,
    pub fragments: usize,
    pub handshake_attempts: u32,
    pub retransmissions: u64,
    pub fast_retransmits: u64,
    /// `Closed` unless the teardown ran out of retries.
    pub teardown: TeardownState,
}

/// Outcome of a successful [`receive_file`].
#[derive(Debug)]
pub struct ReceiveReport<W> {
    pub peer: SocketAddr,
    /// The filename as sent by the peer, unmodified.
    pub filename: String,
    pub sink: W,
    pub bytes: u64,
    /// Non-empty only if segments had to be written past a gap.
    pub residual: Residual,
    pub teardown: TeardownState,
}

/// Send `data` to the receiver at `peer` under the name `filename`.
pub async fn send_file<T: Transport>(
    socket: Socket<T>,
    peer: SocketAddr,
    filename: &str,
    data: Vec<u8>,
    config: Config,
) -> Result<SendReport, Error> {
    let mut conn = Connection::connect(socket, peer, filename, config).await?;
    let stats = conn.send(data).await?;
    let teardown = conn.close().await?;

    Ok(SendReport {
        peer,
        filename: filename.to_owned(),
        bytes: stats.bytes,
        fragments: stats.fragments,
        handshake_attempts: conn.handshake_attempts(),
        retransmissions: stats.retransmissions,
        fast_retransmits: stats.fast_retransmits,
        teardown,
    })
}

/// Wait for one sender and write its file to the sink from `open_sink`.
///
/// `open_sink` is called once, with the peer's filename, before the filename
/// is acknowledged.  The sink is handed back in the report; on error it is
/// dropped.
pub async fn receive_file<T, W, F>(
    socket: Socket<T>,
    config: Config,
    open_sink: F,
) -> Result<ReceiveReport<W>, Error>
where
    T: Transport,
    W: Write,
    F: FnOnce(&str) -> io::Result<W>,
{
    let (mut conn, mut sink) = Connection::accept(socket, config, open_sink).await?;
    let stats = conn.receive(&mut sink).await?;
    let teardown = conn.close().await?;

    Ok(ReceiveReport {
        peer: conn.peer(),
        filename: conn.filename().to_owned(),
        sink,
        bytes: stats.bytes,
        residual: stats.residual,
        teardown,
    })
}

//! Filename exchange that opens a session.
//!
//! The sender transmits one segment, `seq=0 ack=0 payload=<filename>`, and
//! repeats it every `retry_interval` until a reply arrives whose `ack_num`
//! equals `seq + len(filename)`.  That value becomes both the sender's first
//! data offset and the cumulative ACK it starts from; the receiver starts
//! expecting data at the same offset.
//!
//! ```text
//!  sender                                   receiver
//!    │ ── seq=0 ack=0 "report.pdf" ────────▶ │  open sink
//!    │ ◀──────────── seq=0 ack=10 "ACK" ──── │
//!    │ ── seq=10 <data> ───────────────────▶ │
//! ```
//!
//! If the reply is lost the sender repeats the filename.  The receiver then
//! answers with the identical reply without touching the sink again; see
//! [`Accepted::is_replay`].

use std::io;
use std::net::SocketAddr;
use std::path::Path;

use tokio::time::Instant;

use crate::config::Config;
use crate::error::Error;
use crate::segment::{markers, Kind, Segment};
use crate::socket::{Socket, Transport};

/// Sequence state pinned by a successful handshake (sender side).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// Cumulative ACK confirmed by the receiver.
    pub expected_ack: u32,
    /// Offset of the first data byte.
    pub current_seq: u32,
    /// Filename transmissions it took.
    pub attempts: u32,
}

/// A session opened by a peer (receiver side).
#[derive(Debug, Clone)]
pub struct Accepted {
    pub peer: SocketAddr,
    pub filename: String,
    request: Segment,
    reply: Segment,
}

impl Accepted {
    /// First data offset the receiver expects.
    pub fn initial_offset(&self) -> u32 {
        self.reply.ack_num()
    }

    /// The acknowledgement sent for the filename segment.
    pub fn reply(&self) -> &Segment {
        &self.reply
    }

    /// `true` if `segment` is a retransmission of the filename segment.
    pub fn is_replay(&self, segment: &Segment) -> bool {
        *segment == self.request
    }
}

/// Reject filenames that cannot be carried unambiguously.
pub fn validate_filename(filename: &str) -> Result<(), Error> {
    if filename.is_empty() || markers::is_marker(filename.as_bytes()) {
        return Err(Error::InvalidFilename(filename.to_owned()));
    }
    Ok(())
}

/// Reduce a peer-supplied filename to its final path component.
///
/// Returns `None` when nothing usable is left (`""`, `".."`, `"/"`).
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let normalized = filename.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
}

/// Sender half: deliver `filename` to `peer` and wait for its acknowledgement.
pub async fn connect<T: Transport>(
    socket: &Socket<T>,
    peer: SocketAddr,
    filename: &str,
    config: &Config,
) -> Result<Negotiated, Error> {
    validate_filename(filename)?;

    let request = Segment::new(0, 0, filename.as_bytes());
    let wanted = request.end_seq();

    for attempt in 1..=config.retry_limit {
        socket.send_to(&request, peer).await?;
        log::debug!("[handshake] → {request} (attempt {attempt})");

        let deadline = Instant::now() + config.retry_interval;
        while let Some((reply, addr)) = socket.recv_until(deadline).await? {
            if addr != peer {
                continue;
            }
            if reply.ack_num() == wanted {
                log::info!("[handshake] established with {peer}, data starts at {wanted}");
                return Ok(Negotiated {
                    expected_ack: reply.ack_num(),
                    current_seq: wanted,
                    attempts: attempt,
                });
            }
            log::debug!("[handshake] ← unexpected {reply}");
        }
        log::debug!("[handshake] filename not acknowledged in time, resending");
    }

    Err(Error::HandshakeTimeout {
        attempts: config.retry_limit,
    })
}

/// Receiver half: wait for a filename segment, open the sink, acknowledge.
///
/// Control segments and anything not at offset 0 are ignored while waiting.
/// The sink is opened before the reply is sent, so a sender that sees the
/// reply knows the receiver is ready.
pub async fn accept<T, W, F>(socket: &Socket<T>, open_sink: F) -> Result<(Accepted, W), Error>
where
    T: Transport,
    F: FnOnce(&str) -> io::Result<W>,
{
    log::info!("[handshake] waiting for a filename on {}", socket.local_addr);

    let (request, peer, filename) = loop {
        let (segment, addr) = socket.recv_from().await?;
        if segment.kind() != Kind::Data || segment.seq_num() != 0 {
            log::debug!("[handshake] ignoring {segment} from {addr}");
            continue;
        }
        match std::str::from_utf8(segment.payload()) {
            Ok(name) => {
                let name = name.to_owned();
                break (segment, addr, name);
            }
            Err(_) => log::warn!("[handshake] filename from {addr} is not UTF-8, ignoring"),
        }
    };

    let sink = open_sink(&filename).map_err(Error::Sink)?;
    let reply = Segment::new(0, request.end_seq(), markers::ACK);
    socket.send_to(&reply, peer).await?;
    log::info!("[handshake] ← {filename:?} from {peer}; → {reply}");

    let accepted = Accepted {
        peer,
        filename,
        request,
        reply,
    };
    Ok((accepted, sink))
}

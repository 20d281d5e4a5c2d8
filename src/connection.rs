//! Per-peer session context.
//!
//! # Architecture
//!
//! ```text
//!  session::send_file / session::receive_file
//!      │
//!      ▼
//!  Connection ── owns ──▶ Socket<T>   (UdpSocket, or Simulator<UdpSocket> in tests)
//!    │                    Config
//!    │                    peer address, negotiated offsets
//!    │
//!    ├── connect / accept ──▶ handshake   (filename exchange)
//!    ├── send             ──▶ SenderWindow     (pure state machine)
//!    ├── receive          ──▶ ReceiverReorder  (pure state machine)
//!    └── close            ──▶ Teardown         (pure state machine)
//! ```
//!
//! The state machines never touch the socket.  `Connection` feeds them
//! inbound segments and timer expiries, then transmits whatever they hand
//! back.  Nothing is shared between connections; every piece of session state
//! lives in this struct.
//!
//! A connection carries a single transfer in one direction: the side that
//! calls [`Connection::connect`] is the data sender and teardown initiator,
//! the side that calls [`Connection::accept`] is the data receiver and
//! teardown responder.

use std::io::{self, Write};
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::config::{Config, ResidualPolicy};
use crate::error::Error;
use crate::handshake::{self, Accepted};
use crate::receiver::{ReceiveEvent, ReceiverReorder, Residual};
use crate::segment::{Kind, Segment};
use crate::sender::{AckOutcome, SenderWindow};
use crate::socket::{Socket, Transport};
use crate::state::{ConnectionState, TeardownState};
use crate::teardown::{Role, Teardown};

/// Counters from the data phase of a send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendStats {
    pub bytes: u64,
    pub fragments: usize,
    /// Timer-driven retransmissions.
    pub retransmissions: u64,
    /// Retransmissions triggered by repeated stale ACKs.
    pub fast_retransmits: u64,
}

/// Counters from the data phase of a receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    /// Bytes written to the sink, residual flush included.
    pub bytes: u64,
    pub residual: Residual,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Connection<T = UdpSocket> {
    /// Current FSM state.
    pub state: ConnectionState,

    socket: Socket<T>,
    peer: SocketAddr,
    config: Config,
    role: Role,
    filename: String,

    /// Sender: next data offset.  Receiver: always 0.
    local_seq: u32,
    /// Sender: highest cumulative ACK seen.  Receiver: next expected offset.
    ack_num: u32,

    /// Receiver only: the filename exchange, kept to answer replays.
    accepted: Option<Accepted>,
    /// Receiver only: offset carried by the sender's FIN.
    peer_fin: Option<u32>,
    handshake_attempts: u32,
}

impl<T: Transport> Connection<T> {
    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// Active open: deliver `filename` to `peer` and wait for the receiver to
    /// acknowledge it.
    ///
    /// Fails with [`Error::HandshakeTimeout`] after `retry_limit` unanswered
    /// attempts.
    pub async fn connect(
        socket: Socket<T>,
        peer: SocketAddr,
        filename: &str,
        config: Config,
    ) -> Result<Self, Error> {
        config.validate()?;
        let mut conn = Self {
            state: ConnectionState::HandshakeSent,
            socket,
            peer,
            config,
            role: Role::Initiator,
            filename: filename.to_owned(),
            local_seq: 0,
            ack_num: 0,
            accepted: None,
            peer_fin: None,
            handshake_attempts: 0,
        };

        let negotiated = handshake::connect(&conn.socket, peer, filename, &conn.config).await?;
        conn.local_seq = negotiated.current_seq;
        conn.ack_num = negotiated.expected_ack;
        conn.handshake_attempts = negotiated.attempts;
        conn.state = ConnectionState::Established;
        Ok(conn)
    }

    /// Passive open: wait for a filename, open the sink for it with
    /// `open_sink`, and acknowledge.
    pub async fn accept<W, F>(socket: Socket<T>, config: Config, open_sink: F) -> Result<(Self, W), Error>
    where
        F: FnOnce(&str) -> io::Result<W>,
    {
        config.validate()?;
        let (accepted, sink) = handshake::accept(&socket, open_sink).await?;
        let conn = Self {
            state: ConnectionState::Established,
            socket,
            peer: accepted.peer,
            config,
            role: Role::Responder,
            filename: accepted.filename.clone(),
            local_seq: 0,
            ack_num: accepted.initial_offset(),
            accepted: Some(accepted),
            peer_fin: None,
            handshake_attempts: 1,
        };
        Ok((conn, sink))
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn socket(&self) -> &Socket<T> {
        &self.socket
    }

    /// Filename transmissions the handshake needed (sender side).
    pub fn handshake_attempts(&self) -> u32 {
        self.handshake_attempts
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Transfer `data` to the peer and return once every byte is covered by a
    /// cumulative ACK.
    ///
    /// Each loop iteration sends whatever the window has room for, resends
    /// every segment whose timer ran out, then waits for one ACK, but never
    /// past the nearest retransmit deadline.  Timers are checked on every
    /// iteration, so a steady stream of stale ACKs cannot postpone them.
    ///
    /// Data-plane loss is never an error here: the window keeps
    /// retransmitting until the peer acknowledges, however long that takes.
    pub async fn send(&mut self, data: Vec<u8>) -> Result<SendStats, Error> {
        self.require(Role::Initiator, ConnectionState::Established)?;

        let bytes = data.len() as u64;
        let mut window = SenderWindow::new(self.local_seq, self.ack_num, data, &self.config)?;
        log::info!(
            "[send] {} bytes in {} fragments to {}",
            bytes,
            window.total_fragments(),
            self.peer
        );

        loop {
            let now = Instant::now();
            for segment in window.poll_transmit(now.into_std()) {
                self.socket.send_to(&segment, self.peer).await?;
                log::debug!("[send] → {segment} in_flight={}", window.in_flight());
            }
            for segment in window.on_tick(now.into_std()) {
                self.socket.send_to(&segment, self.peer).await?;
                log::debug!("[send] → {segment} (timeout)");
            }
            if window.is_complete() {
                break;
            }

            let mut deadline = now + self.config.read_timeout;
            if let Some(due) = window.next_deadline() {
                deadline = deadline.min(Instant::from_std(due));
            }
            let Some((segment, addr)) = self.socket.recv_until(deadline).await? else {
                continue;
            };
            if addr != self.peer {
                log::debug!("[send] ignoring {segment} from {addr}");
                continue;
            }
            if segment.kind() != Kind::Ack {
                log::debug!("[send] ignoring {segment}");
                continue;
            }

            match window.on_ack(segment.ack_num(), Instant::now().into_std()) {
                AckOutcome::Advanced { acked } => {
                    log::debug!(
                        "[send] ← ACK {} (slid {} fragment(s), base={})",
                        segment.ack_num(),
                        acked,
                        window.base()
                    );
                }
                AckOutcome::FastRetransmit(resend) => {
                    self.socket.send_to(&resend, self.peer).await?;
                    log::debug!("[send] → {resend} (repeated ACK {})", segment.ack_num());
                }
                AckOutcome::Duplicate { count } => {
                    log::trace!("[send] ← stale ACK {} (x{count})", segment.ack_num());
                }
                AckOutcome::Ignored => {}
            }
        }

        self.local_seq = window.current_seq();
        self.ack_num = window.expected_ack();
        let stats = SendStats {
            bytes,
            fragments: window.total_fragments(),
            retransmissions: window.retransmissions(),
            fast_retransmits: window.fast_retransmits(),
        };
        log::info!(
            "[send] all data acknowledged ({} retransmissions, {} fast)",
            stats.retransmissions,
            stats.fast_retransmits
        );
        Ok(stats)
    }

    /// Write the peer's byte stream to `sink` until its end-of-data FIN.
    ///
    /// Buffered segments that never became contiguous are handled according
    /// to [`Config::residual`].  The sink is flushed before returning.
    ///
    /// Fails with [`Error::PeerUnresponsive`] once the sender has been silent
    /// for [`Config::idle_limit`] read timeouts.
    pub async fn receive<W: Write>(&mut self, sink: &mut W) -> Result<ReceiveStats, Error> {
        self.require(Role::Responder, ConnectionState::Established)?;

        let mut reorder = ReceiverReorder::new(self.ack_num, self.config.dup_threshold);
        log::info!(
            "[recv] receiving {:?} from {}, first offset {}",
            self.filename,
            self.peer,
            self.ack_num
        );

        let mut last_heard = Instant::now();
        let fin_seq = loop {
            let now = Instant::now();
            self.check_silence(last_heard, now)?;

            let Some((segment, addr)) = self
                .socket
                .recv_until(now + self.config.read_timeout)
                .await?
            else {
                log::trace!("[recv] idle, expecting offset {}", reorder.expected_offset());
                continue;
            };
            if addr != self.peer {
                log::debug!("[recv] ignoring {segment} from {addr}");
                continue;
            }
            last_heard = Instant::now();

            if let Some(accepted) = self.accepted.as_ref().filter(|a| a.is_replay(&segment)) {
                self.socket.send_to(accepted.reply(), self.peer).await?;
                log::debug!("[recv] filename repeated; → {}", accepted.reply());
                continue;
            }

            let event = reorder.on_segment(&segment, sink)?;
            for ack in event.acks() {
                self.socket.send_to(ack, self.peer).await?;
            }
            match event {
                ReceiveEvent::EndOfData { fin_seq } => break fin_seq,
                ReceiveEvent::Delivered { bytes, acks } => {
                    log::debug!(
                        "[recv] ← seq={} delivered {} byte(s); → {} ACK(s) up to {}",
                        segment.seq_num(),
                        bytes,
                        acks.len(),
                        reorder.expected_offset()
                    );
                }
                ReceiveEvent::Buffered { ack } => {
                    log::debug!(
                        "[recv] ← seq={} ahead of gap, buffered; → ACK {}",
                        segment.seq_num(),
                        ack.ack_num()
                    );
                }
                ReceiveEvent::Duplicate { ack, escalated } => {
                    log::debug!(
                        "[recv] ← seq={} duplicate{}; → ACK {}",
                        segment.seq_num(),
                        if escalated { " (threshold)" } else { "" },
                        ack.ack_num()
                    );
                }
                ReceiveEvent::Ignored => log::debug!("[recv] ignoring {segment}"),
            }
        };

        self.ack_num = reorder.expected_offset();
        self.peer_fin = Some(fin_seq);
        log::info!("[recv] ← FIN seq={fin_seq}");

        let residual = if reorder.buffered() == 0 {
            Residual::default()
        } else {
            match self.config.residual {
                ResidualPolicy::Reject => {
                    return Err(Error::IncompleteTransfer {
                        segments: reorder.buffered(),
                    });
                }
                ResidualPolicy::Flush => {
                    let residual = reorder.flush_residual(sink)?;
                    log::warn!(
                        "[recv] flushed {} segment(s) ({} bytes) past a gap at offset {}",
                        residual.segments,
                        residual.bytes,
                        self.ack_num
                    );
                    residual
                }
            }
        };
        sink.flush().map_err(Error::Sink)?;

        Ok(ReceiveStats {
            bytes: reorder.delivered(),
            residual,
        })
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Run the two-sided close and return where it ended.
    ///
    /// The sender calls this after [`Connection::send`]; the receiver after
    /// [`Connection::receive`] has seen the FIN.  An exhausted retry budget is
    /// logged and reported through the returned state rather than as an
    /// error: all data was already confirmed.
    ///
    /// After closing, the initiator keeps answering repeated peer FINs for
    /// `linger`, in case its final FIN_ACK was lost.
    pub async fn close(&mut self) -> Result<TeardownState, Error> {
        if self.state != ConnectionState::Established {
            return Err(Error::BadState(self.state));
        }
        let limit = self.config.retry_limit;
        let mut teardown = match self.role {
            Role::Initiator => Teardown::initiate(self.local_seq, 0, limit),
            Role::Responder => {
                let fin_seq = self.peer_fin.ok_or(Error::BadState(self.state))?;
                let (teardown, fin_ack) = Teardown::respond(fin_seq, 0, self.ack_num, limit);
                self.socket.send_to(&fin_ack, self.peer).await?;
                log::debug!("[teardown] → {fin_ack}");
                teardown
            }
        };
        self.state = ConnectionState::Closing;

        let fin = teardown.start();
        self.socket.send_to(&fin, self.peer).await?;
        log::debug!("[teardown] → {fin}");

        let mut deadline = Instant::now() + self.config.retry_interval;
        while !teardown.is_closed() {
            let Some((segment, addr)) = self.socket.recv_until(deadline).await? else {
                match teardown.on_timeout() {
                    Ok(Some(fin)) => {
                        self.socket.send_to(&fin, self.peer).await?;
                        log::debug!("[teardown] → {fin} (attempt {})", teardown.transmissions());
                    }
                    Ok(None) => log::trace!("[teardown] waiting in {}", teardown.state()),
                    Err(e) if !e.is_fatal() => {
                        log::warn!("[teardown] {e}; giving up in {}", teardown.state());
                        break;
                    }
                    Err(e) => return Err(e),
                }
                deadline = Instant::now() + self.config.retry_interval;
                continue;
            };
            if addr != self.peer {
                continue;
            }
            if let Some(reply) = teardown.on_segment(&segment) {
                self.socket.send_to(&reply, self.peer).await?;
                log::debug!("[teardown] ← {segment}; → {reply}");
            } else if self.role == Role::Responder && segment.kind() == Kind::Data {
                // Late retransmission: our ACK for it went missing.
                self.socket
                    .send_to(&Segment::ack(0, self.ack_num), self.peer)
                    .await?;
            }
        }

        if teardown.is_closed() {
            log::info!("[teardown] closed with {}", self.peer);
            if self.role == Role::Initiator {
                self.linger(&mut teardown).await;
            }
        }
        self.state = ConnectionState::Closed;
        Ok(teardown.state())
    }

    async fn linger(&self, teardown: &mut Teardown) {
        let until = Instant::now() + self.config.linger;
        loop {
            match self.socket.recv_until(until).await {
                Ok(Some((segment, addr))) if addr == self.peer => {
                    if let Some(reply) = teardown.on_segment(&segment) {
                        if let Err(e) = self.socket.send_to(&reply, self.peer).await {
                            log::debug!("[teardown] linger send failed: {e}");
                            return;
                        }
                        log::debug!("[teardown] ← {segment} while lingering; → {reply}");
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => return,
                Err(e) => {
                    log::debug!("[teardown] linger ended early: {e}");
                    return;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn require(&self, role: Role, state: ConnectionState) -> Result<(), Error> {
        if self.role != role || self.state != state {
            return Err(Error::BadState(self.state));
        }
        Ok(())
    }

    /// Fail once the peer has been silent for `idle_limit` read timeouts.
    fn check_silence(&self, last_heard: Instant, now: Instant) -> Result<(), Error> {
        if let Some(limit) = self.config.idle_limit {
            if now.duration_since(last_heard) >= self.config.read_timeout * limit {
                log::warn!("[recv] no datagram from {} in {limit} read timeouts", self.peer);
                return Err(Error::PeerUnresponsive { timeouts: limit });
            }
        }
        Ok(())
    }
}

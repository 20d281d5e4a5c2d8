//! `urft`: reliable single-file transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  data segments   ┌────────────────┐
//!  │ SenderWindow │─────────────────▶│ ReceiverReorder│──▶ sink
//!  └──────┬───────┘                  └───────┬────────┘
//!         │         cumulative ACKs          │
//!         │◀─────────────────────────────────┘
//!         │
//!  ┌──────▼───────────────────────────────────────────┐
//!  │                    Connection                     │
//!  │  handshake ─▶ data phase ─▶ teardown              │
//!  │  (owns socket, config and negotiated offsets)     │
//!  └──────┬───────────────────────────────────────────┘
//!         │ segments (8-byte header + payload)
//!  ┌──────▼──────┐
//!  │  Socket<T>  │  T = tokio UdpSocket, or Simulator<UdpSocket>
//!  └─────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]     : wire format and control-marker classification
//! - [`handshake`]   : filename exchange that pins the initial offsets
//! - [`sender`]      : selective-retransmit send window (no I/O)
//! - [`receiver`]    : reorder buffer and cumulative ACKs (no I/O)
//! - [`teardown`]    : two-sided FIN / FIN_ACK close (no I/O)
//! - [`connection`]  : per-peer context driving the above over a socket
//! - [`session`]     : `send_file` / `receive_file` with reports
//! - [`state`]       : finite-state-machine types
//! - [`timer`]       : per-segment retransmit deadlines
//! - [`socket`]      : async datagram transport abstraction
//! - [`simulator`]   : lossy/reordering/duplicating network layer for testing
//! - [`config`]      : protocol tunables
//! - [`checksum`]    : BLAKE3 content digests for reporting
//! - [`error`]       : crate-wide error type

pub mod checksum;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod receiver;
pub mod segment;
pub mod sender;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod teardown;
pub mod timer;

pub use config::{Config, ResidualPolicy};
pub use connection::Connection;
pub use error::Error;
pub use session::{receive_file, send_file, ReceiveReport, SendReport};
pub use socket::{Socket, Transport};

//! Entry point for `urft`.
//!
//! Parses CLI arguments and dispatches into either **send** or **recv** mode.
//! All protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, signal handling, argument parsing) and the
//! filesystem on both ends.

use std::fs::File;
use std::io::{self, BufWriter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::UdpSocket;

use urft::checksum::{self, HashingWriter};
use urft::handshake::sanitize_filename;
use urft::simulator::{Simulator, SimulatorConfig};
use urft::{Config, Error, ResidualPolicy, Socket, Transport};

/// Reliable single-file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send one file to a waiting receiver.
    Send {
        /// File to send.
        file: PathBuf,
        /// Receiver address (e.g. 127.0.0.1:9000).
        server: String,
        #[command(flatten)]
        tuning: Tuning,
        #[command(flatten)]
        faults: Faults,
    },
    /// Wait for one file and write it to disk.
    Recv {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: String,
        /// Directory the received file is written into.
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
        #[command(flatten)]
        tuning: Tuning,
        #[command(flatten)]
        faults: Faults,
    },
}

#[derive(Args, Debug)]
struct Tuning {
    /// Maximum payload bytes per data segment.
    #[arg(long, default_value_t = 1024)]
    fragment_size: usize,
    /// Maximum unacknowledged fragments in flight.
    #[arg(long, default_value_t = 8)]
    window: usize,
    /// Per-segment retransmit timeout, in milliseconds.
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,
    /// Upper bound on a single receive wait, in milliseconds.
    #[arg(long, default_value_t = 100)]
    read_timeout_ms: u64,
    /// Repeated stale ACKs / duplicate segments that trigger a resend.
    #[arg(long, default_value_t = 3)]
    dup_threshold: u32,
    /// Handshake and teardown attempts.
    #[arg(long, default_value_t = 20)]
    retries: u32,
    /// Handshake and teardown retransmit interval, in milliseconds.
    #[arg(long, default_value_t = 500)]
    retry_interval_ms: u64,
    /// How long the sender keeps answering FINs after closing, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    linger_ms: u64,
    /// Receiver gives up after this many silent read timeouts (0 waits forever).
    #[arg(long, default_value_t = 300)]
    idle_limit: u32,
    /// Fail instead of writing segments stranded behind a gap.
    #[arg(long)]
    strict: bool,
}

impl Tuning {
    fn config(&self) -> Config {
        Config {
            fragment_size: self.fragment_size,
            window_size: self.window,
            segment_timeout: Duration::from_millis(self.timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            dup_threshold: self.dup_threshold,
            retry_limit: self.retries,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            linger: Duration::from_millis(self.linger_ms),
            idle_limit: (self.idle_limit > 0).then_some(self.idle_limit),
            residual: if self.strict {
                ResidualPolicy::Reject
            } else {
                ResidualPolicy::Flush
            },
        }
    }
}

/// Outbound fault injection, for trying the protocol on a clean network.
#[derive(Args, Debug)]
struct Faults {
    /// Probability of dropping an outbound datagram.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,
    /// Probability of delaying an outbound datagram past the next one.
    #[arg(long, default_value_t = 0.0)]
    reorder: f64,
    /// Probability of sending an outbound datagram twice.
    #[arg(long, default_value_t = 0.0)]
    duplicate: f64,
    /// RNG seed for the fault model.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

impl Faults {
    fn is_active(&self) -> bool {
        self.loss > 0.0 || self.reorder > 0.0 || self.duplicate > 0.0
    }

    fn config(&self) -> Result<SimulatorConfig> {
        for (name, p) in [
            ("loss", self.loss),
            ("reorder", self.reorder),
            ("duplicate", self.duplicate),
        ] {
            anyhow::ensure!((0.0..=1.0).contains(&p), "--{name} must be within [0, 1]");
        }
        Ok(SimulatorConfig {
            loss_rate: self.loss,
            reorder_rate: self.reorder,
            duplicate_rate: self.duplicate,
            seed: self.seed,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("interrupted; abandoning the transfer");
            Err(Error::UserAbort.into())
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.mode {
        Mode::Send {
            file,
            server,
            tuning,
            faults,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let filename = file
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("{} has no usable file name", file.display()))?;
            let peer = tokio::net::lookup_host(&server)
                .await
                .with_context(|| format!("resolving {server}"))?
                .next()
                .with_context(|| format!("{server} did not resolve to an address"))?;
            let bind = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
            let udp = UdpSocket::bind(bind).await?;

            log::info!("Sending {} ({} bytes) to {peer}", file.display(), data.len());
            if faults.is_active() {
                let sim = Simulator::new(udp, faults.config()?);
                send(Socket::new(sim)?, peer, filename, data, tuning.config()).await
            } else {
                send(Socket::new(udp)?, peer, filename, data, tuning.config()).await
            }
        }
        Mode::Recv {
            bind,
            out_dir,
            tuning,
            faults,
        } => {
            let udp = UdpSocket::bind(&bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            log::info!("Listening on {}", udp.local_addr()?);
            if faults.is_active() {
                let sim = Simulator::new(udp, faults.config()?);
                recv(Socket::new(sim)?, out_dir, tuning.config()).await
            } else {
                recv(Socket::new(udp)?, out_dir, tuning.config()).await
            }
        }
    }
}

async fn send<T: Transport>(
    socket: Socket<T>,
    peer: SocketAddr,
    filename: &str,
    data: Vec<u8>,
    config: Config,
) -> Result<()> {
    let digest = checksum::hex_digest(&data);
    let report = urft::send_file(socket, peer, filename, data, config).await?;
    println!(
        "sent {} ({} bytes, {} fragments, {} retransmissions) to {}; teardown {}",
        report.filename,
        report.bytes,
        report.fragments,
        report.retransmissions + report.fast_retransmits,
        report.peer,
        report.teardown
    );
    println!("blake3 {digest}");
    Ok(())
}

async fn recv<T: Transport>(socket: Socket<T>, out_dir: PathBuf, config: Config) -> Result<()> {
    let mut written_to = PathBuf::new();
    let open = |name: &str| -> io::Result<HashingWriter<BufWriter<File>>> {
        let safe = sanitize_filename(name).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unusable filename {name:?}"),
            )
        })?;
        written_to = out_dir.join(safe);
        log::info!("Writing {}", written_to.display());
        Ok(HashingWriter::new(BufWriter::new(File::create(&written_to)?)))
    };

    let report = urft::receive_file(socket, config, open).await?;
    println!(
        "received {} ({} bytes) from {} into {}; teardown {}",
        report.filename,
        report.bytes,
        report.peer,
        written_to.display(),
        report.teardown
    );
    if report.residual.segments > 0 {
        println!(
            "warning: {} segment(s) ({} bytes) were written past a gap",
            report.residual.segments, report.residual.bytes
        );
    }
    println!("blake3 {}", report.sink.hex_digest());
    Ok(())
}

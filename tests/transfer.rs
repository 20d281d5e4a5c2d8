//! End-to-end transfers over loopback UDP.
//!
//! Lossy runs wrap both sockets in a seeded [`Simulator`], so faults hit the
//! data segments, the ACKs, the handshake and the teardown alike.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use urft::{
    receive_file, send_file,
    simulator::{Simulator, SimulatorConfig},
    socket::{Socket, Transport},
    segment::{Kind, Segment},
    state::TeardownState,
    Config, Connection, Error, ReceiveReport, ResidualPolicy, SendReport,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(fragment_size: usize, window_size: usize) -> Config {
    Config {
        fragment_size,
        window_size,
        segment_timeout: Duration::from_millis(40),
        read_timeout: Duration::from_millis(10),
        retry_interval: Duration::from_millis(30),
        retry_limit: 20,
        linger: Duration::from_millis(300),
        ..Config::default()
    }
}

async fn udp() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.expect("bind loopback")
}

async fn plain() -> Socket {
    Socket::new(udp().await).unwrap()
}

async fn faulty(sim: SimulatorConfig) -> Socket<Simulator<UdpSocket>> {
    Socket::new(Simulator::new(udp().await, sim)).unwrap()
}

fn payload(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random()).collect()
}

async fn transfer<S: Transport, R: Transport>(
    sender: Socket<S>,
    receiver: Socket<R>,
    data: Vec<u8>,
    config: Config,
) -> (SendReport, ReceiveReport<Vec<u8>>) {
    let peer = receiver.local_addr;
    let (sent, received) = timeout(Duration::from_secs(30), async {
        tokio::join!(
            send_file(sender, peer, "payload.bin", data, config.clone()),
            receive_file(receiver, config.clone(), |_| Ok(Vec::new())),
        )
    })
    .await
    .expect("transfer timed out");
    (sent.expect("send failed"), received.expect("receive failed"))
}

// ---------------------------------------------------------------------------
// Lossless
// ---------------------------------------------------------------------------

/// 100 bytes, 20-byte fragments, window of 3: five fragments, clean close.
#[tokio::test]
async fn hundred_bytes_in_five_fragments() {
    let data = payload(100, 1);
    let (sent, received) = transfer(plain().await, plain().await, data.clone(), config(20, 3)).await;

    assert_eq!(sent.fragments, 5);
    assert_eq!(sent.bytes, 100);
    assert_eq!(received.sink, data);
    assert_eq!(received.bytes, 100);
    assert_eq!(received.filename, "payload.bin");
    assert_eq!(sent.teardown, TeardownState::Closed);
    assert_eq!(received.teardown, TeardownState::Closed);
}

#[tokio::test]
async fn round_trip_across_fragment_and_window_sizes() {
    let data = payload(5_000, 2);
    for (fragment_size, window_size) in [(1, 64), (7, 1), (512, 4), (4_999, 2), (8_192, 8)] {
        let (sent, received) = transfer(
            plain().await,
            plain().await,
            data.clone(),
            config(fragment_size, window_size),
        )
        .await;
        assert_eq!(received.sink, data, "fragment={fragment_size} window={window_size}");
        assert_eq!(sent.fragments, data.len().div_ceil(fragment_size));
    }
}

#[tokio::test]
async fn empty_file() {
    let (sent, received) = transfer(plain().await, plain().await, Vec::new(), config(20, 3)).await;
    assert_eq!(sent.fragments, 0);
    assert!(received.sink.is_empty());
    assert_eq!(sent.teardown, TeardownState::Closed);
    assert_eq!(received.teardown, TeardownState::Closed);
}

/// File content that spells a control marker is delivered as data, not
/// taken for end-of-data.
#[tokio::test]
async fn marker_shaped_content_is_delivered_as_data() {
    for (content, fragment_size) in [
        (&b"FIN"[..], 3),
        (&b"ACK"[..], 3),
        (&b"FIN_ACK"[..], 7),
        (&b"FINFINFIN"[..], 3),
        (&b"xxFIN_ACKFIN_ACK"[..], 7),
    ] {
        let (_, received) = transfer(
            plain().await,
            plain().await,
            content.to_vec(),
            config(fragment_size, 2),
        )
        .await;
        assert_eq!(received.sink, content);
        assert_eq!(received.residual.segments, 0);
    }
}

// ---------------------------------------------------------------------------
// Faulty network
// ---------------------------------------------------------------------------

fn faults(loss: f64, reorder: f64, duplicate: f64, seed: u64) -> SimulatorConfig {
    SimulatorConfig {
        loss_rate: loss,
        reorder_rate: reorder,
        duplicate_rate: duplicate,
        seed,
    }
}

#[tokio::test]
async fn survives_loss_in_both_directions() {
    let data = payload(20_000, 3);
    let sender = faulty(faults(0.2, 0.0, 0.0, 11)).await;
    let receiver = faulty(faults(0.2, 0.0, 0.0, 12)).await;

    let (sent, received) = transfer(sender, receiver, data.clone(), config(500, 8)).await;
    assert_eq!(received.sink, data);
    assert!(sent.retransmissions + sent.fast_retransmits > 0);
}

#[tokio::test]
async fn survives_reordering() {
    let data = payload(20_000, 4);
    let sender = faulty(faults(0.0, 0.4, 0.0, 21)).await;
    let receiver = faulty(faults(0.0, 0.4, 0.0, 22)).await;

    let (_, received) = transfer(sender, receiver, data.clone(), config(500, 8)).await;
    assert_eq!(received.sink, data);
    assert_eq!(received.residual.segments, 0);
}

#[tokio::test]
async fn survives_duplication() {
    let data = payload(20_000, 5);
    let sender = faulty(faults(0.0, 0.0, 0.5, 31)).await;
    let receiver = faulty(faults(0.0, 0.0, 0.5, 32)).await;

    let (sent, received) = transfer(sender, receiver, data.clone(), config(500, 8)).await;
    assert_eq!(received.sink, data);
    assert_eq!(received.bytes, sent.bytes);
}

#[tokio::test]
async fn survives_everything_at_once() {
    let data = payload(30_000, 6);
    let sender = faulty(faults(0.15, 0.2, 0.1, 41)).await;
    let receiver = faulty(faults(0.15, 0.2, 0.1, 42)).await;

    let (_, received) = transfer(sender, receiver, data.clone(), config(700, 6)).await;
    assert_eq!(received.sink, data);
}

// ---------------------------------------------------------------------------
// Gap at end-of-data
// ---------------------------------------------------------------------------

/// A hand-driven sender that skips bytes 4..8 and then signals end-of-data.
async fn gapped_receive(residual: ResidualPolicy) -> (Result<urft::connection::ReceiveStats, Error>, Vec<u8>) {
    let server = plain().await;
    let server_addr = server.local_addr;
    let raw = plain().await;
    let cfg = Config {
        residual,
        ..config(4, 4)
    };

    let (accepted, _) = tokio::join!(
        Connection::accept(server, cfg, |_| Ok(Vec::<u8>::new())),
        async {
            raw.send_to(&Segment::new(0, 0, b"g.bin".to_vec()), server_addr)
                .await
                .unwrap();
            raw.recv_from().await.unwrap()
        },
    );
    let (mut conn, mut sink) = accepted.unwrap();

    let (result, _) = timeout(Duration::from_secs(5), async {
        tokio::join!(conn.receive(&mut sink), async {
            for (seq, chunk) in [(5, &b"abcd"[..]), (13, &b"ijkl"[..])] {
                raw.send_to(&Segment::new(seq, 0, chunk.to_vec()), server_addr)
                    .await
                    .unwrap();
                raw.recv_from().await.unwrap();
            }
            raw.send_to(&Segment::fin(17, 0), server_addr).await.unwrap();
        })
    })
    .await
    .unwrap();
    (result, sink)
}

#[tokio::test]
async fn gap_is_written_through_by_default() {
    let (result, sink) = gapped_receive(ResidualPolicy::Flush).await;
    let stats = result.unwrap();
    assert_eq!(sink, b"abcdijkl");
    assert_eq!(stats.residual.segments, 1);
    assert_eq!(stats.residual.bytes, 4);
}

#[tokio::test]
async fn gap_is_an_error_when_strict() {
    let (result, sink) = gapped_receive(ResidualPolicy::Reject).await;
    assert!(matches!(
        result,
        Err(Error::IncompleteTransfer { segments: 1 })
    ));
    assert_eq!(sink, b"abcd");
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

/// The receiver takes every byte, then disappears without answering the FIN.
/// All data was confirmed, so the send still succeeds.
#[tokio::test]
async fn vanished_receiver_does_not_fail_the_send() {
    let receiver = plain().await;
    let peer = receiver.local_addr;
    let cfg = Config {
        retry_limit: 3,
        ..config(20, 3)
    };
    let data = payload(100, 7);

    let (sent, received) = timeout(Duration::from_secs(10), async {
        tokio::join!(
            send_file(plain().await, peer, "payload.bin", data.clone(), cfg.clone()),
            async {
                let (mut conn, mut sink) =
                    Connection::accept(receiver, cfg.clone(), |_| Ok(Vec::<u8>::new())).await?;
                conn.receive(&mut sink).await?;
                Ok::<_, Error>(sink)
            },
        )
    })
    .await
    .expect("transfer timed out");

    assert_eq!(received.expect("receive failed"), data);
    let sent = sent.expect("send must succeed without a teardown partner");
    assert_eq!(sent.bytes, 100);
    assert_ne!(sent.teardown, TeardownState::Closed);
    assert_eq!(sent.teardown, TeardownState::LocalFinSent);
}

/// A data segment retransmitted after the FIN (its ACK was lost) is
/// acknowledged again while the receiver is closing.
#[tokio::test]
async fn late_data_during_teardown_is_acknowledged() {
    let server = plain().await;
    let server_addr = server.local_addr;
    let raw = plain().await;
    let cfg = config(4, 4);

    let (accepted, _) = tokio::join!(
        Connection::accept(server, cfg, |_| Ok(Vec::<u8>::new())),
        async {
            raw.send_to(&Segment::new(0, 0, b"g.bin".to_vec()), server_addr)
                .await
                .unwrap();
            raw.recv_from().await.unwrap()
        },
    );
    let (mut conn, mut sink) = accepted.unwrap();
    let late = Segment::new(5, 0, b"abcd".to_vec());

    let (closed, re_ack) = timeout(Duration::from_secs(5), async {
        tokio::join!(
            async {
                conn.receive(&mut sink).await?;
                conn.close().await
            },
            async {
                raw.send_to(&late, server_addr).await.unwrap();
                assert_eq!(raw.recv_from().await.unwrap().0, Segment::ack(0, 9));
                raw.send_to(&Segment::fin(9, 0), server_addr).await.unwrap();

                // Wait until the receiver is closing: it answers our FIN and
                // sends its own.
                loop {
                    let (segment, _) = raw.recv_from().await.unwrap();
                    if segment.kind() == Kind::Fin {
                        break;
                    }
                }

                raw.send_to(&late, server_addr).await.unwrap();
                let re_ack = loop {
                    let (segment, _) = raw.recv_from().await.unwrap();
                    if segment.kind() == Kind::Ack {
                        break segment;
                    }
                };
                raw.send_to(&Segment::fin_ack(9, 0), server_addr)
                    .await
                    .unwrap();
                re_ack
            },
        )
    })
    .await
    .expect("teardown timed out");

    assert_eq!(re_ack, Segment::ack(0, 9));
    assert_eq!(closed.unwrap(), TeardownState::Closed);
    assert_eq!(sink, b"abcd");
}

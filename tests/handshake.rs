//! Integration tests for the filename handshake.
//!
//! Each test binds real `tokio::net::UdpSocket`s on loopback.  Where a test
//! needs exact control over what one side puts on the wire, that side is a
//! bare [`Socket`] speaking segments by hand.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::timeout;
use urft::{
    connection::Connection,
    segment::Segment,
    socket::Socket,
    state::ConnectionState,
    Config, Error,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn ephemeral() -> (Socket, SocketAddr) {
    let socket = Socket::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind loopback socket");
    let addr = socket.local_addr;
    (socket, addr)
}

fn fast_config() -> Config {
    Config {
        segment_timeout: Duration::from_millis(40),
        read_timeout: Duration::from_millis(10),
        retry_interval: Duration::from_millis(30),
        retry_limit: 10,
        linger: Duration::from_millis(50),
        ..Config::default()
    }
}

const LIMIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Both sides reach `Established` and agree on the filename.
#[tokio::test]
async fn handshake_both_sides_reach_established() {
    let (server, server_addr) = ephemeral().await;
    let (client, _) = ephemeral().await;

    let (client, server) = timeout(LIMIT, async {
        tokio::join!(
            Connection::connect(client, server_addr, "report.pdf", fast_config()),
            Connection::accept(server, fast_config(), |_| Ok(Vec::<u8>::new())),
        )
    })
    .await
    .expect("handshake timed out");

    let client = client.expect("connect failed");
    let (server, _sink) = server.expect("accept failed");

    assert_eq!(client.state, ConnectionState::Established);
    assert_eq!(server.state, ConnectionState::Established);
    assert_eq!(server.filename(), "report.pdf");
    assert_eq!(server.peer(), client.local_addr());
    assert_eq!(client.handshake_attempts(), 1);
}

/// The reply acknowledges `seq + len(filename)`: data starts right after the name.
#[tokio::test]
async fn reply_pins_first_data_offset() {
    let (server, server_addr) = ephemeral().await;
    let (raw, _) = ephemeral().await;

    let (accepted, reply) = timeout(LIMIT, async {
        tokio::join!(
            Connection::accept(server, fast_config(), |_| Ok(Vec::<u8>::new())),
            async {
                raw.send_to(&Segment::new(0, 0, b"abc.txt".to_vec()), server_addr)
                    .await
                    .unwrap();
                raw.recv_from().await.unwrap().0
            },
        )
    })
    .await
    .unwrap();

    accepted.unwrap();
    assert_eq!(reply, Segment::new(0, 7, b"ACK".to_vec()));
}

/// A lost reply makes the sender repeat the filename.
#[tokio::test]
async fn sender_repeats_filename_until_acknowledged() {
    let (raw, raw_addr) = ephemeral().await;
    let (client, _) = ephemeral().await;

    let (conn, seen) = timeout(LIMIT, async {
        tokio::join!(
            Connection::connect(client, raw_addr, "a.bin", fast_config()),
            async {
                // Swallow the first copy, answer the second.
                let (first, _) = raw.recv_from().await.unwrap();
                let (second, from) = raw.recv_from().await.unwrap();
                raw.send_to(&Segment::new(0, second.end_seq(), b"ACK".to_vec()), from)
                    .await
                    .unwrap();
                (first, second)
            },
        )
    })
    .await
    .unwrap();

    let conn = conn.expect("connect failed");
    assert_eq!(conn.handshake_attempts(), 2);
    assert_eq!(seen.0, seen.1);
    assert_eq!(seen.0, Segment::new(0, 0, b"a.bin".to_vec()));
}

/// Nobody answers: the sender gives up after `retry_limit` attempts.
#[tokio::test]
async fn silent_receiver_times_out() {
    let (_silent, silent_addr) = ephemeral().await;
    let (client, _) = ephemeral().await;
    let cfg = Config {
        retry_limit: 3,
        ..fast_config()
    };

    let err = timeout(LIMIT, Connection::connect(client, silent_addr, "a.bin", cfg))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, Error::HandshakeTimeout { attempts: 3 }));
}

/// Filenames that would read as control segments are refused up front.
#[tokio::test]
async fn marker_filename_rejected() {
    let (_server, server_addr) = ephemeral().await;
    for name in ["FIN", "ACK", "FIN_ACK", ""] {
        let (client, _) = ephemeral().await;
        let err = Connection::connect(client, server_addr, name, fast_config())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFilename(_)), "{name:?}: {err}");
    }
}

/// Stray control segments before the filename are ignored.
#[tokio::test]
async fn accept_skips_control_segments() {
    let (server, server_addr) = ephemeral().await;
    let (raw, _) = ephemeral().await;

    let (accepted, reply) = timeout(LIMIT, async {
        tokio::join!(
            Connection::accept(server, fast_config(), |_| Ok(Vec::<u8>::new())),
            async {
                raw.send_to(&Segment::ack(0, 0), server_addr).await.unwrap();
                raw.send_to(&Segment::fin(4, 0), server_addr).await.unwrap();
                raw.send_to(&Segment::new(0, 0, b"x.txt".to_vec()), server_addr)
                    .await
                    .unwrap();
                raw.recv_from().await.unwrap().0
            },
        )
    })
    .await
    .unwrap();

    let (conn, _) = accepted.unwrap();
    assert_eq!(conn.filename(), "x.txt");
    assert_eq!(reply.ack_num(), 5);
}

/// Replaying the filename after the sink is open gets the identical reply
/// and leaves the sink alone.
#[tokio::test]
async fn filename_replay_is_idempotent() {
    let (server, server_addr) = ephemeral().await;
    let (raw, _) = ephemeral().await;
    let request = Segment::new(0, 0, b"notes.txt".to_vec());

    let (accepted, first_reply) = timeout(LIMIT, async {
        tokio::join!(
            Connection::accept(server, fast_config(), |_| Ok(Vec::<u8>::new())),
            async {
                raw.send_to(&request, server_addr).await.unwrap();
                raw.recv_from().await.unwrap().0
            },
        )
    })
    .await
    .unwrap();
    let (mut conn, mut sink) = accepted.unwrap();

    let (stats, replies) = timeout(LIMIT, async {
        tokio::join!(conn.receive(&mut sink), async {
            raw.send_to(&Segment::new(9, 0, b"hello".to_vec()), server_addr)
                .await
                .unwrap();
            let data_ack = raw.recv_from().await.unwrap().0;

            let mut replays = Vec::new();
            for _ in 0..2 {
                raw.send_to(&request, server_addr).await.unwrap();
                replays.push(raw.recv_from().await.unwrap().0);
            }

            raw.send_to(&Segment::fin(14, 0), server_addr).await.unwrap();
            (data_ack, replays)
        })
    })
    .await
    .unwrap();

    let stats = stats.expect("receive failed");
    let (data_ack, replays) = replies;
    assert_eq!(data_ack, Segment::ack(0, 14));
    assert!(replays.iter().all(|r| *r == first_reply));
    assert_eq!(first_reply.encode(), replays[0].encode());
    assert_eq!(sink, b"hello");
    assert_eq!(stats.bytes, 5);
}

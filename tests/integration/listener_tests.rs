//! Integration tests for the loopback listener and the connection reader.

use std::net::TcpListener as StdTcpListener;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use maxima_bridge::connection::{run_reader, AcceptOutcome, Connection, Inbound, Listener};

async fn accept(listener: &Listener) -> Connection {
    match listener
        .accept_once(Duration::from_secs(5))
        .await
        .expect("accept must not fail")
    {
        AcceptOutcome::Connected(conn) => conn,
        AcceptOutcome::TimedOut => panic!("peer did not connect"),
    }
}

// ── Binding ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn zero_hint_binds_os_assigned_port() {
    let listener = Listener::bind(0, 10).await.expect("bind");
    assert_ne!(listener.port(), 0);
}

#[tokio::test]
async fn taken_port_falls_back_to_another() {
    let occupied = StdTcpListener::bind("127.0.0.1:0").expect("occupy a port");
    let taken = occupied.local_addr().expect("addr").port();

    let listener = Listener::bind(taken, 1).await.expect("bind with fallback");

    assert_ne!(listener.port(), taken);
    assert_ne!(listener.port(), 0);
}

// ── Accepting ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn accept_times_out_without_peer() {
    let listener = Listener::bind(0, 1).await.expect("bind");

    let outcome = listener
        .accept_once(Duration::from_millis(50))
        .await
        .expect("accept must not fail");

    assert!(matches!(outcome, AcceptOutcome::TimedOut));
}

#[tokio::test]
async fn second_peer_is_rejected_while_first_is_active() {
    let listener = Listener::bind(0, 1).await.expect("bind");
    let port = listener.port();

    let _first = TcpStream::connect(("127.0.0.1", port)).await.expect("first");
    let mut conn = accept(&listener).await;

    let mut second = TcpStream::connect(("127.0.0.1", port)).await.expect("second");
    listener.reject_next().await.expect("reject");

    let mut buf = [0u8; 8];
    let read = tokio::time::timeout(Duration::from_secs(5), second.read(&mut buf))
        .await
        .expect("rejected peer must see the connection end");
    assert!(matches!(read, Ok(0) | Err(_)), "rejected peer must get EOF");

    conn.write_all(b"still here\n").await.expect("first peer unaffected");
}

// ── Reader task ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn reader_scrubs_nuls_and_reports_close_once() {
    let listener = Listener::bind(0, 1).await.expect("bind");
    let mut engine = TcpStream::connect(("127.0.0.1", listener.port()))
        .await
        .expect("connect");
    let (reader, _writer) = accept(&listener).await.into_split();

    let (tx, mut rx) = mpsc::channel(16);
    let task = tokio::spawn(run_reader(reader, tx, CancellationToken::new()));

    engine.write_all(b"a\0b").await.expect("write");
    engine.write_all(b"\0\0").await.expect("write");
    engine.write_all(b"c\n").await.expect("write");
    engine.shutdown().await.expect("shutdown");
    drop(engine);

    let mut received = Vec::new();
    let mut closes = 0;
    while let Some(message) = rx.recv().await {
        match message {
            Inbound::Chunk(bytes) => {
                assert!(!bytes.is_empty(), "empty chunks must not be forwarded");
                received.extend_from_slice(&bytes);
            }
            Inbound::Closed { .. } => closes += 1,
        }
    }

    assert_eq!(received, b"abc\n");
    assert_eq!(closes, 1);
    task.await.expect("reader task must finish");
}

#[tokio::test]
async fn cancelled_reader_stops_without_close() {
    let listener = Listener::bind(0, 1).await.expect("bind");
    let _engine = TcpStream::connect(("127.0.0.1", listener.port()))
        .await
        .expect("connect");
    let (reader, _writer) = accept(&listener).await.into_split();

    let (tx, mut rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_reader(reader, tx, cancel.clone()));

    cancel.cancel();
    task.await.expect("reader task must finish");

    assert!(rx.recv().await.is_none());
}

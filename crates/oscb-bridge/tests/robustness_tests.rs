//! Robustness tests for the bridge.
//!
//! These tests verify the endpoints handle edge cases and error conditions
//! gracefully:
//! - Malformed datagrams
//! - Panicking handlers
//! - Pattern isolation
//! - Replies from server to client
//! - Background reconnect when the port is busy
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use oscb_bridge::{
    atoms, Atom, Client, ConnectionConfig, ConnectionState, Message, Packet, ReconnectPolicy,
    Server,
};
use oscb_protocol::{Bundle, TimeTag};
use tokio::net::UdpSocket;
use tokio::time::{sleep, Instant};

// ============================================================================
// Constants
// ============================================================================

const DELIVERY_TIMEOUT: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

// ============================================================================
// Test Helpers
// ============================================================================

type Log = Arc<Mutex<Vec<String>>>;

/// Handler that records `address` plus the first argument rendered as text.
fn recorder(log: &Log) -> impl Fn(&str, &[Atom]) + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |address, args| {
        let first = args
            .first()
            .map(|atom| match atom.as_string() {
                Ok(text) => text.to_string(),
                Err(_) => atom.to_string(),
            })
            .unwrap_or_default();
        log.lock().unwrap().push(format!("{address} {first}"));
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if condition() {
            return true;
        }
        sleep(POLL_INTERVAL).await;
    }
    condition()
}

async fn started_server() -> (Server, SocketAddr) {
    let server = Server::new(ConnectionConfig::server("127.0.0.1", 0)).unwrap();
    server.connect().await.unwrap();
    let addr = server.local_addr().await.unwrap();
    (server, addr)
}

async fn started_client(port: u16) -> Client {
    let client = Client::new(ConnectionConfig::client("127.0.0.1", port)).unwrap();
    client.connect().await.unwrap();
    client
}

fn logged(log: &Log, entry: &str) -> bool {
    log.lock().unwrap().iter().any(|e| e == entry)
}

// ============================================================================
// Malformed Input
// ============================================================================

#[tokio::test]
async fn test_malformed_datagrams_do_not_stop_receive_loop() {
    let (server, addr) = started_server().await;
    let log: Log = Arc::default();
    server.register_handler("/test/m4l", recorder(&log)).unwrap();

    let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let garbage: [&[u8]; 6] = [
        b"",
        b"not osc at all",
        b"/test/m4l\0\0\0",
        b"/test/m4l\0\0\0,i\0\0\0\0",
        b"#bundle\0\0\0\0\0\0\0\0\x01\xff\xff\xff\xff",
        &[0xff; 64],
    ];
    for datagram in garbage {
        raw.send_to(datagram, addr).await.unwrap();
    }

    let client = started_client(addr.port()).await;
    assert!(client.send("/test/m4l", &atoms!["still alive"]).await);

    assert!(wait_until(|| logged(&log, "/test/m4l still alive"), DELIVERY_TIMEOUT).await);
    assert!(server.is_connected());
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_raw_message_from_foreign_socket_is_dispatched() {
    let (server, addr) = started_server().await;
    let log: Log = Arc::default();
    server.register_handler("/raw", recorder(&log)).unwrap();

    let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let bytes = oscb_protocol::encode("/raw", &atoms![42]).unwrap();
    raw.send_to(&bytes, addr).await.unwrap();

    assert!(wait_until(|| logged(&log, "/raw 42"), DELIVERY_TIMEOUT).await);
    assert_eq!(server.last_peer(), Some(raw.local_addr().unwrap()));
}

// ============================================================================
// Handlers
// ============================================================================

#[tokio::test]
async fn test_panicking_handler_does_not_stop_others() {
    let (server, addr) = started_server().await;
    let log: Log = Arc::default();
    server
        .register_handler("/test/m4l", |_, _| panic!("handler failure"))
        .unwrap();
    server.register_handler("/test/m4l", recorder(&log)).unwrap();

    let client = started_client(addr.port()).await;
    assert!(client.send("/test/m4l", &atoms!["one"]).await);
    assert!(client.send("/test/m4l", &atoms!["two"]).await);

    assert!(wait_until(|| logged(&log, "/test/m4l two"), DELIVERY_TIMEOUT).await);
    assert!(logged(&log, "/test/m4l one"));
    assert!(server.is_connected());
}

#[tokio::test]
async fn test_literal_pattern_only_matches_exact_address() {
    let (server, addr) = started_server().await;
    let log: Log = Arc::default();
    server.register_handler("/test/m4l", recorder(&log)).unwrap();

    let client = started_client(addr.port()).await;
    client.send("/test/other", &atoms!["x"]).await;
    client.send("/test/m4l/deeper", &atoms!["x"]).await;
    client.send("/test", &atoms!["x"]).await;
    client.send("/test/m4l", &atoms!["marker"]).await;

    assert!(wait_until(|| logged(&log, "/test/m4l marker"), DELIVERY_TIMEOUT).await);
    assert_eq!(*log.lock().unwrap(), vec!["/test/m4l marker"]);
}

#[tokio::test]
async fn test_wildcard_handlers_all_fire_in_order() {
    let (server, addr) = started_server().await;
    let order: Log = Arc::default();
    for (pattern, tag) in [("/synth/*", "star"), ("/synth/{freq,gain}", "choice"), ("/synth/fre?", "any")] {
        let order = Arc::clone(&order);
        server
            .register_handler(pattern, move |_, _| order.lock().unwrap().push(tag.to_string()))
            .unwrap();
    }

    let client = started_client(addr.port()).await;
    assert!(client.send("/synth/freq", &atoms![440.0f32]).await);

    assert!(wait_until(|| order.lock().unwrap().len() == 3, DELIVERY_TIMEOUT).await);
    assert_eq!(*order.lock().unwrap(), vec!["star", "choice", "any"]);
}

#[tokio::test]
async fn test_bundle_messages_dispatched_in_order() {
    let (server, addr) = started_server().await;
    let log: Log = Arc::default();
    server.register_handler("/b/*", recorder(&log)).unwrap();

    let client = started_client(addr.port()).await;
    let bundle = Packet::Bundle(Bundle::new(
        TimeTag::IMMEDIATE,
        vec![
            Message::new("/b/first", atoms![1]).into(),
            Packet::Bundle(Bundle::immediate(vec![Message::new("/b/second", atoms![2]).into()])),
        ],
    ));
    assert!(client.send_packet(&bundle).await);

    assert!(wait_until(|| log.lock().unwrap().len() == 2, DELIVERY_TIMEOUT).await);
    assert_eq!(*log.lock().unwrap(), vec!["/b/first 1", "/b/second 2"]);
}

// ============================================================================
// Replies
// ============================================================================

#[tokio::test]
async fn test_server_replies_to_last_peer() {
    let (server, addr) = started_server().await;
    let client = started_client(addr.port()).await;

    let replies: Log = Arc::default();
    client.register_handler("/reply", recorder(&replies)).unwrap();

    // No peer yet.
    assert!(!server.send("/reply", &atoms!["early"]).await);

    assert!(client.send("/ping", &[]).await);
    assert!(wait_until(|| server.last_peer().is_some(), DELIVERY_TIMEOUT).await);

    assert!(server.send("/reply", &atoms!["pong"]).await);
    assert!(wait_until(|| logged(&replies, "/reply pong"), DELIVERY_TIMEOUT).await);
}

#[tokio::test]
async fn test_server_replies_to_fixed_port_out() {
    let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let reply_port = listener.local_addr().unwrap().port();

    let server = Server::new(ConnectionConfig::server("127.0.0.1", 0).with_port_out(reply_port)).unwrap();
    server.connect().await.unwrap();
    assert!(server.send("/status", &atoms!["ready"]).await);

    let mut buf = [0u8; 256];
    let (len, _) = tokio::time::timeout(DELIVERY_TIMEOUT, listener.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let message = oscb_protocol::decode_message(&buf[..len]).unwrap();
    assert_eq!(message.address, "/status");
    assert_eq!(message.args, atoms!["ready"]);
}

// ============================================================================
// Reconnect
// ============================================================================

#[tokio::test]
async fn test_failed_connect_is_reported_not_fatal() {
    let blocker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = blocker.local_addr().unwrap().port();

    let server = Server::new(ConnectionConfig::server("127.0.0.1", port)).unwrap();
    assert!(server.connect().await.is_err());
    assert_eq!(server.state(), ConnectionState::Disconnected);
    assert!(!server.send("/x", &[]).await);
}

#[tokio::test]
async fn test_background_reconnect_once_port_frees() {
    let blocker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = blocker.local_addr().unwrap().port();

    let policy = ReconnectPolicy {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        ..Default::default()
    };
    let server = Server::new(ConnectionConfig::server("127.0.0.1", port).with_reconnect_policy(policy)).unwrap();
    let log: Log = Arc::default();
    server.register_handler("/test/m4l", recorder(&log)).unwrap();

    assert!(server.connect().await.is_err());

    // Host reload while the port is still busy: keeps retrying in background.
    server.handle_lifecycle_event("liveset_loaded").await;
    assert_eq!(server.state(), ConnectionState::Reconnecting);

    drop(blocker);
    assert!(wait_until(|| server.is_connected(), Duration::from_secs(2)).await);

    let client = started_client(port).await;
    assert!(client.send("/test/m4l", &atoms!["recovered"]).await);
    assert!(wait_until(|| logged(&log, "/test/m4l recovered"), DELIVERY_TIMEOUT).await);

    server.disconnect().await;
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    let blocker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = blocker.local_addr().unwrap().port();

    let policy = ReconnectPolicy {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(10),
        multiplier: 2.0,
        max_attempts: Some(3),
    };
    let server = Server::new(ConnectionConfig::server("127.0.0.1", port).with_reconnect_policy(policy)).unwrap();
    let _ = server.connect().await;
    server.handle_lifecycle_event("liveset_new").await;

    assert!(
        wait_until(
            || server.state() == ConnectionState::Disconnected,
            Duration::from_secs(1)
        )
        .await
    );
    drop(blocker);
}

#[tokio::test]
async fn test_send_while_reconnecting_waits_then_drops() {
    let blocker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = blocker.local_addr().unwrap().port();

    let config = ConnectionConfig::server("127.0.0.1", port)
        .with_port_out(9)
        .with_send_wait(Duration::from_millis(30));
    let server = Server::new(config).unwrap();
    let _ = server.connect().await;
    server.handle_lifecycle_event("liveset_loaded").await;
    assert_eq!(server.state(), ConnectionState::Reconnecting);

    let start = Instant::now();
    assert!(!server.send("/x", &[]).await);
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(25), "returned after {waited:?}");
    assert!(waited < Duration::from_millis(500));

    server.disconnect().await;
    assert_eq!(server.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_no_auto_reconnect_leaves_disconnected() {
    let blocker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = blocker.local_addr().unwrap().port();

    let config = ConnectionConfig::server("127.0.0.1", port).with_auto_reconnect(false);
    let server = Server::new(config).unwrap();
    let _ = server.connect().await;
    server.handle_lifecycle_event("liveset_loaded").await;

    assert_eq!(server.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_dropping_server_releases_port() {
    let (server, addr) = started_server().await;
    drop(server);

    let mut rebound = None;
    let start = Instant::now();
    while rebound.is_none() && start.elapsed() < DELIVERY_TIMEOUT {
        rebound = UdpSocket::bind(addr).await.ok();
        if rebound.is_none() {
            sleep(POLL_INTERVAL).await;
        }
    }
    assert!(rebound.is_some(), "port {} still held after drop", addr.port());
}

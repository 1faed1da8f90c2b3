//! Tests for Client
//!
//! These tests verify:
//! - Connect success and failure reporting
//! - Send paths with and without a connection
//! - Disconnect semantics (explicit and remote)
//! - Chunked receive and strict UTF-8 decoding

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use rapidnet::{Client, ClientEvent, Config, NetError, Server, ServerEvent};
use tokio::sync::broadcast;

// =============================================================================
// Helper Functions
// =============================================================================

const WAIT: Duration = Duration::from_secs(5);

async fn next_event<E: Clone>(rx: &mut broadcast::Receiver<E>) -> E {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn local_server() -> (Server, broadcast::Receiver<ServerEvent>, SocketAddr) {
    let server = Server::new(Config::builder().bind_addr(Ipv4Addr::LOCALHOST).build()).unwrap();
    let mut events = server.subscribe();
    let addr = server.start(0).unwrap();
    assert!(matches!(next_event(&mut events).await, ServerEvent::Started { .. }));
    (server, events, addr)
}

/// A port with nothing listening on it
fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

// =============================================================================
// Connect Tests
// =============================================================================

#[tokio::test]
async fn test_connect_publishes_connected() {
    let (_server, _server_events, addr) = local_server().await;
    let client = Client::new(Config::default()).unwrap();
    let mut events = client.subscribe();

    let connection = client
        .connect("127.0.0.1", addr.port(), Some("alice".to_string()))
        .await
        .unwrap();

    assert!(matches!(next_event(&mut events).await, ClientEvent::Connected));
    assert!(client.is_connected());
    assert!(connection.is_connected());
    assert_eq!(client.server_addr(), Some(addr));
    assert_eq!(client.client_id().as_deref(), Some("alice"));
    assert_eq!(connection.client_id(), Some("alice"));
}

#[tokio::test]
async fn test_connect_refused_publishes_exception() {
    let port = closed_port();
    let client = Client::new(Config::default()).unwrap();
    let mut events = client.subscribe();

    let result = client.connect("127.0.0.1", port, None).await;

    assert!(matches!(result, Err(NetError::Connect { .. })));
    assert!(matches!(
        next_event(&mut events).await,
        ClientEvent::Exception(NetError::Connect { .. })
    ));
    assert!(!client.is_connected());
    assert!(client.connection().is_none());
}

#[tokio::test]
async fn test_connect_while_connected_is_rejected() {
    let (_server, _server_events, addr) = local_server().await;
    let client = Client::new(Config::default()).unwrap();
    let first = client.connect("127.0.0.1", addr.port(), None).await.unwrap();

    let second = client.connect("127.0.0.1", addr.port(), None).await;

    assert!(matches!(second, Err(NetError::AlreadyConnected)));
    assert_eq!(client.connection().unwrap().handle(), first.handle());
}

#[tokio::test]
async fn test_concurrent_connects_admit_exactly_one() {
    let (server, mut server_events, addr) = local_server().await;
    let client = Client::new(Config::default()).unwrap();
    let mut events = client.subscribe();

    let (first, second) = tokio::join!(
        client.connect("127.0.0.1", addr.port(), None),
        client.connect("127.0.0.1", addr.port(), None),
    );

    let (winner, loser) = match (first, second) {
        (Ok(winner), loser) | (loser, Ok(winner)) => (winner, loser),
        (Err(a), Err(b)) => panic!("Both connects failed: {} / {}", a, b),
    };
    assert!(matches!(loser, Err(NetError::AlreadyConnected)));
    assert_eq!(client.connection().unwrap().handle(), winner.handle());

    assert!(matches!(next_event(&mut events).await, ClientEvent::Connected));
    assert!(matches!(
        next_event(&mut server_events).await,
        ServerEvent::ClientConnected(_)
    ));

    // No second connection reached the server
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(server.client_count(), 1);
}

#[tokio::test]
async fn test_connect_to_unroutable_address_fails() {
    let client = Client::new(Config::builder().connect_timeout_ms(100).build()).unwrap();

    let result = client.connect("10.255.255.1", 9, None).await;

    assert!(matches!(
        result,
        Err(NetError::ConnectTimeout { timeout_ms: 100, .. }) | Err(NetError::Connect { .. })
    ));
    assert!(!client.is_connected());
}

// =============================================================================
// Send Tests
// =============================================================================

#[tokio::test]
async fn test_send_without_connection_fails() {
    let client = Client::new(Config::default()).unwrap();
    let mut events = client.subscribe();

    assert!(matches!(client.send("hello"), Err(NetError::NotConnected)));
    assert!(matches!(
        next_event(&mut events).await,
        ClientEvent::Exception(NetError::NotConnected)
    ));
    assert!(matches!(
        client.send_confirmed("hello").await,
        Err(NetError::NotConnected)
    ));
}

#[tokio::test]
async fn test_send_confirmed_counts_bytes() {
    let (_server, mut server_events, addr) = local_server().await;
    let client = Client::new(Config::default()).unwrap();
    let connection = client.connect("127.0.0.1", addr.port(), None).await.unwrap();

    let written = client.send_confirmed("hello").await.unwrap();

    assert_eq!(written, 5);
    assert_eq!(connection.bytes_sent(), 5);

    let mut received = String::new();
    while received.len() < 5 {
        if let ServerEvent::MessageReceived { text, .. } = next_event(&mut server_events).await {
            received.push_str(&text);
        }
    }
    assert_eq!(received, "hello");
}

#[tokio::test]
async fn test_sends_arrive_in_call_order() {
    let (_server, mut server_events, addr) = local_server().await;
    let client = Client::new(Config::default()).unwrap();
    client.connect("127.0.0.1", addr.port(), None).await.unwrap();

    let mut expected = String::new();
    for i in 0..20 {
        let part = format!("[{}]", i);
        client.send(&part).unwrap();
        expected.push_str(&part);
    }

    let mut received = String::new();
    while received.len() < expected.len() {
        if let ServerEvent::MessageReceived { text, .. } = next_event(&mut server_events).await {
            received.push_str(&text);
        }
    }
    assert_eq!(received, expected);
}

// =============================================================================
// Disconnect Tests
// =============================================================================

#[tokio::test]
async fn test_disconnect_fires_on_every_call() {
    let (_server, _server_events, addr) = local_server().await;
    let client = Client::new(Config::default()).unwrap();
    let mut events = client.subscribe();
    let connection = client.connect("127.0.0.1", addr.port(), None).await.unwrap();
    assert!(matches!(next_event(&mut events).await, ClientEvent::Connected));

    client.disconnect();
    client.disconnect();

    assert!(matches!(next_event(&mut events).await, ClientEvent::Disconnected));
    assert!(matches!(next_event(&mut events).await, ClientEvent::Disconnected));
    assert!(!client.is_connected());
    assert!(!connection.is_connected());
    assert!(client.connection().is_none());
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let (_server, mut server_events, addr) = local_server().await;
    let client = Client::new(Config::default()).unwrap();

    let first = client.connect("127.0.0.1", addr.port(), None).await.unwrap();
    client.disconnect();
    let second = client.connect("127.0.0.1", addr.port(), None).await.unwrap();

    assert_ne!(first.handle(), second.handle());
    assert!(client.is_connected());
    assert!(!first.is_connected());

    let mut accepted = 0;
    while accepted < 2 {
        if let ServerEvent::ClientConnected(_) = next_event(&mut server_events).await {
            accepted += 1;
        }
    }
}

#[tokio::test]
async fn test_remote_close_fires_exception_then_disconnected() {
    let (server, mut server_events, addr) = local_server().await;
    let client = Client::new(Config::default()).unwrap();
    let mut events = client.subscribe();
    let connection = client.connect("127.0.0.1", addr.port(), None).await.unwrap();
    assert!(matches!(next_event(&mut events).await, ClientEvent::Connected));
    assert!(matches!(
        next_event(&mut server_events).await,
        ServerEvent::ClientConnected(_)
    ));

    server.stop().await;

    match next_event(&mut events).await {
        ClientEvent::Exception(NetError::ClosedByPeer { handle })
        | ClientEvent::Exception(NetError::Receive { handle, .. }) => {
            assert_eq!(handle, connection.handle())
        }
        other => panic!("Expected receive fault, got {:?}", other),
    }
    assert!(matches!(next_event(&mut events).await, ClientEvent::Disconnected));
    assert!(client.connection().is_none());
    assert!(!client.is_connected());
}

// =============================================================================
// Receive Tests
// =============================================================================

#[tokio::test]
async fn test_small_buffer_splits_messages() {
    let (server, mut server_events, addr) = local_server().await;
    let client = Client::new(Config::builder().receive_buffer_size(4).build()).unwrap();
    let mut events = client.subscribe();
    client.connect("127.0.0.1", addr.port(), None).await.unwrap();
    assert!(matches!(next_event(&mut events).await, ClientEvent::Connected));
    assert!(matches!(
        next_event(&mut server_events).await,
        ServerEvent::ClientConnected(_)
    ));

    server.send_to_all("hello world").await;

    let mut received = String::new();
    let mut chunks = 0;
    while received.len() < 11 {
        match next_event(&mut events).await {
            ClientEvent::MessageReceived { text } => {
                assert!(text.len() <= 4);
                received.push_str(&text);
                chunks += 1;
            }
            other => panic!("Expected message, got {:?}", other),
        }
    }
    assert_eq!(received, "hello world");
    assert!(chunks >= 3);
}

#[tokio::test]
async fn test_strict_utf8_reports_invalid_chunks() {
    let (server, mut server_events, addr) = local_server().await;
    let config = Config::builder()
        .receive_buffer_size(1)
        .strict_utf8(true)
        .build();
    let client = Client::new(config).unwrap();
    let mut events = client.subscribe();
    let connection = client.connect("127.0.0.1", addr.port(), None).await.unwrap();
    assert!(matches!(next_event(&mut events).await, ClientEvent::Connected));
    assert!(matches!(
        next_event(&mut server_events).await,
        ServerEvent::ClientConnected(_)
    ));

    // Two-byte character, read one byte at a time
    server.send_to_all("é").await;
    server.send_to_all("k").await;

    for _ in 0..2 {
        match next_event(&mut events).await {
            ClientEvent::Exception(NetError::Decode { handle, .. }) => {
                assert_eq!(handle, connection.handle())
            }
            other => panic!("Expected decode fault, got {:?}", other),
        }
    }
    match next_event(&mut events).await {
        ClientEvent::MessageReceived { text } => assert_eq!(text, "k"),
        other => panic!("Expected message, got {:?}", other),
    }
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_lossy_utf8_replaces_invalid_chunks() {
    let (server, mut server_events, addr) = local_server().await;
    let client = Client::new(Config::builder().receive_buffer_size(1).build()).unwrap();
    let mut events = client.subscribe();
    client.connect("127.0.0.1", addr.port(), None).await.unwrap();
    assert!(matches!(next_event(&mut events).await, ClientEvent::Connected));
    assert!(matches!(
        next_event(&mut server_events).await,
        ServerEvent::ClientConnected(_)
    ));

    server.send_to_all("é").await;

    for _ in 0..2 {
        match next_event(&mut events).await {
            ClientEvent::MessageReceived { text } => assert_eq!(text, "\u{FFFD}"),
            other => panic!("Expected message, got {:?}", other),
        }
    }
}

//! End-to-end protocol scenarios over loopback sockets.
//!
//! Each test starts a real server on an ephemeral port with a seeded
//! temporary content directory (sample `index` and `about` pages).

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

use pixnet::protocol::{self, ERR_INVALID_SESSION, ERR_PROTOCOL_ERROR, ERR_SERVER_ERROR};
use pixnet::{
    ClientUpdate, Frame, Message, PixnetClient, PixnetServer, ServerConfig, PROTOCOL_VERSION,
};

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    server: Arc<PixnetServer>,
    addr: std::net::SocketAddr,
    _content: tempfile::TempDir,
}

async fn start_server(mutate: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let content = tempfile::tempdir().unwrap();
    let mut config = ServerConfig {
        port: 0,
        content_dir: content.path().to_path_buf(),
        cleanup_interval: Duration::from_millis(100),
        ..ServerConfig::default()
    };
    mutate(&mut config);

    let server = Arc::new(PixnetServer::new(config).unwrap());
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let background = server.clone();
    tokio::spawn(async move { background.serve(listener).await });

    TestServer {
        server,
        addr,
        _content: content,
    }
}

async fn next_frame(updates: &mut UnboundedReceiver<ClientUpdate>) -> Frame {
    timeout(WAIT, async {
        loop {
            match updates.recv().await {
                Some(ClientUpdate::Frame(frame)) => return frame,
                Some(other) => panic!("expected frame, got {other:?}"),
                None => panic!("update channel closed while waiting for a frame"),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

async fn wait_for_no_sessions(server: &PixnetServer, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    while server.session_count() > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "sessions not cleaned up in time"
        );
        sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn smoke_connect_receive_index_disconnect() {
    let ts = start_server(|_| {}).await;
    let (client, mut updates) = PixnetClient::connect(ts.addr, "tst").await.unwrap();

    assert_ne!(client.session_id(), [0u8; 8]);
    let frame = next_frame(&mut updates).await;
    assert_eq!(frame.sequence, 0);
    assert_eq!(
        frame.pixels.len(),
        frame.width as usize * frame.height as usize * 4
    );
    assert_eq!(
        frame.category_map.len(),
        frame.width as usize * frame.height as usize * 2
    );
    assert_eq!(ts.server.session_count(), 1);

    client.disconnect().await.unwrap();
    wait_for_no_sessions(&ts.server, Duration::from_secs(1)).await;

    let stats = ts.server.stats().snapshot();
    assert_eq!(stats.connections, 1);
    assert!(stats.pages_served >= 1);
    assert!(stats.bytes_sent > 0);
    assert!(stats.bytes_received > 0);
}

#[tokio::test]
async fn navigate_to_about_increments_sequence() {
    let ts = start_server(|_| {}).await;
    let (client, mut updates) = PixnetClient::connect(ts.addr, "tst").await.unwrap();

    let index = next_frame(&mut updates).await;
    assert_eq!(index.sequence, 0);
    assert_eq!(index.categories.len(), 3);

    client.send_event(0, 0, "nav_about", (0, 0), &[]).await.unwrap();
    let about = next_frame(&mut updates).await;
    assert_eq!(about.sequence, 1);
    assert_eq!(about.categories.len(), 1);
    assert_eq!(about.categories[0].name, "back_1");

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn pointer_click_drives_navigation() {
    let ts = start_server(|_| {}).await;
    let (client, mut updates) = PixnetClient::connect(ts.addr, "tst").await.unwrap();

    let index = next_frame(&mut updates).await;
    // The sample index has its "about" button at (150..230, 100..130).
    assert_eq!(index.category_at(160, 110), 2);
    let clicked = client.pointer_click(&index, 160, 110).await.unwrap();
    assert_eq!(clicked, Some(2));

    let about = next_frame(&mut updates).await;
    assert_eq!(about.categories[0].name, "back_1");
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn unknown_navigation_target_sends_no_frame() {
    let ts = start_server(|_| {}).await;
    let (client, mut updates) = PixnetClient::connect(ts.addr, "tst").await.unwrap();
    let _ = next_frame(&mut updates).await;

    client
        .send_event(0, 0, "nav_missing", (0, 0), &[])
        .await
        .unwrap();
    // The event is accepted (logged server-side) but produces no frame and
    // keeps the session open.
    client.ping().await.unwrap();
    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert!(matches!(update, ClientUpdate::Pong { .. }));
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn ping_echoes_timestamp_bytes() {
    let ts = start_server(|_| {}).await;
    let (client, mut updates) = PixnetClient::connect(ts.addr, "tst").await.unwrap();
    let _ = next_frame(&mut updates).await;

    let sent = client.ping().await.unwrap();
    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    match update {
        ClientUpdate::Pong { timestamp } => assert_eq!(timestamp, sent),
        other => panic!("expected pong, got {other:?}"),
    }
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn bad_magic_yields_protocol_error_and_close() {
    let ts = start_server(|_| {}).await;
    let mut stream = TcpStream::connect(ts.addr).await.unwrap();

    let handshake = Message::Handshake {
        version: PROTOCOL_VERSION,
        capabilities: 0,
        user_agent: "raw".into(),
    };
    stream.write_all(&handshake.encode().unwrap()).await.unwrap();

    let ack = protocol::read_message(&mut stream, WAIT).await.unwrap();
    assert!(matches!(ack, Message::Ack { .. }));
    let index = protocol::read_message(&mut stream, WAIT).await.unwrap();
    assert!(matches!(index, Message::Frame(_)));

    stream.write_all(b"XXXXXX").await.unwrap();

    let error = protocol::read_message(&mut stream, WAIT).await.unwrap();
    match error {
        Message::Error { code, .. } => assert_eq!(code, ERR_PROTOCOL_ERROR),
        other => panic!("expected error, got {other:?}"),
    }
    // The server closes the socket after the error.
    let next = protocol::read_message(&mut stream, WAIT).await;
    assert!(matches!(next, Err(pixnet::PixnetError::Closed)));
    wait_for_no_sessions(&ts.server, Duration::from_secs(1)).await;
}

#[tokio::test]
async fn wrong_session_token_is_rejected() {
    let ts = start_server(|_| {}).await;
    let mut stream = TcpStream::connect(ts.addr).await.unwrap();

    let handshake = Message::Handshake {
        version: PROTOCOL_VERSION,
        capabilities: 0,
        user_agent: "raw".into(),
    };
    stream.write_all(&handshake.encode().unwrap()).await.unwrap();
    let _ack = protocol::read_message(&mut stream, WAIT).await.unwrap();
    let _index = protocol::read_message(&mut stream, WAIT).await.unwrap();

    let forged = Message::Event {
        session_id: [0xFF; 8],
        sequence: 1,
        zone_id: 0,
        event_type: 0,
        timestamp_us: 0,
        mouse_x: 0,
        mouse_y: 0,
        modifiers: 0,
        name: "nav_about".into(),
        payload: Vec::new(),
    };
    stream.write_all(&forged.encode().unwrap()).await.unwrap();

    let error = protocol::read_message(&mut stream, WAIT).await.unwrap();
    match error {
        Message::Error { code, .. } => assert_eq!(code, ERR_INVALID_SESSION),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn unsupported_version_is_refused_at_handshake() {
    let ts = start_server(|_| {}).await;
    let mut stream = TcpStream::connect(ts.addr).await.unwrap();

    let handshake = Message::Handshake {
        version: 99,
        capabilities: 0,
        user_agent: "old".into(),
    };
    stream.write_all(&handshake.encode().unwrap()).await.unwrap();

    let error = protocol::read_message(&mut stream, WAIT).await.unwrap();
    match error {
        Message::Error { code, .. } => assert_eq!(code, 1001),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(ts.server.session_count(), 0);
}

#[tokio::test]
async fn idle_session_expires_and_socket_closes() {
    let ts = start_server(|config| {
        config.max_session_age = Duration::from_millis(500);
        config.cleanup_interval = Duration::from_millis(100);
    })
    .await;
    let (_client, mut updates) = PixnetClient::connect(ts.addr, "tst").await.unwrap();
    let _ = next_frame(&mut updates).await;
    assert_eq!(ts.server.session_count(), 1);

    // Idle past the session age; the sweeper must close the socket and drop
    // the session.
    let disconnected = timeout(Duration::from_secs(3), async {
        loop {
            match updates.recv().await {
                Some(ClientUpdate::Disconnected) | None => break,
                Some(_) => continue,
            }
        }
    })
    .await;
    assert!(disconnected.is_ok(), "server did not close the idle session");
    wait_for_no_sessions(&ts.server, Duration::from_secs(1)).await;
}

#[tokio::test]
async fn connections_over_capacity_are_refused() {
    let ts = start_server(|config| config.max_connections = 1).await;
    let (client, mut updates) = PixnetClient::connect(ts.addr, "first").await.unwrap();
    let _ = next_frame(&mut updates).await;

    let mut stream = TcpStream::connect(ts.addr).await.unwrap();
    let error = protocol::read_message(&mut stream, WAIT).await.unwrap();
    match error {
        Message::Error { code, .. } => assert_eq!(code, ERR_SERVER_ERROR),
        other => panic!("expected error, got {other:?}"),
    }
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn input_values_are_recorded_per_session() {
    let ts = start_server(|_| {}).await;
    let (client, mut updates) = PixnetClient::connect(ts.addr, "tst").await.unwrap();
    let _ = next_frame(&mut updates).await;

    client.send_input(3, 0, 1, "alice").await.unwrap();
    // Input is fire-and-forget; round-trip a ping so the server has
    // processed it before we assert.
    client.ping().await.unwrap();
    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert!(matches!(update, ClientUpdate::Pong { .. }));
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn server_shutdown_notifies_clients() {
    let ts = start_server(|_| {}).await;
    let (_client, mut updates) = PixnetClient::connect(ts.addr, "tst").await.unwrap();
    let _ = next_frame(&mut updates).await;

    ts.server.shutdown();
    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    match update {
        ClientUpdate::ServerError { code, .. } => assert_eq!(code, ERR_SERVER_ERROR),
        other => panic!("expected shutdown error, got {other:?}"),
    }
}

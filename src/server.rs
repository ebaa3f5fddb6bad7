// Copyright 2025 PIXNET Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! PIXNET server: accept loop, handshake, per-session dispatch and cleanup.
//!
//! One task accepts connections, one task sweeps expired sessions, and each
//! connected client gets a dedicated handler task. A handler owns its
//! socket exclusively; the sweeper only ever signals a session's shutdown
//! handle and lets the handler tear itself down. Frames are assembled into
//! a single buffer and written under the per-connection send lock, so a
//! frame's fragments are never interleaved with another write on the same
//! socket.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, Notify};

use crate::content::{ContentRegistry, INDEX_PAGE};
use crate::error::{PixnetError, Result};
use crate::io::{self, CountingReader};
use crate::protocol::{
    self, Frame, Message, CAP_COMPRESSION, ERR_PROTOCOL_ERROR, ERR_SERVER_ERROR,
    ERR_UNSUPPORTED_VERSION, PROTOCOL_VERSION,
};
use crate::session::{SessionRegistry, MAX_SESSION_AGE};

/// Server tuning knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind; loopback by default.
    pub host: String,
    /// TCP port to listen on.
    pub port: u16,
    /// Directory scanned for `*.pxnt` pages.
    pub content_dir: PathBuf,
    /// Maximum simultaneous client connections.
    pub max_connections: usize,
    /// Idle time after which a session expires.
    pub max_session_age: Duration,
    /// Period of the expired-session sweeper.
    pub cleanup_interval: Duration,
    /// Read deadline during the handshake.
    pub handshake_timeout: Duration,
    /// Per-message read deadline after the handshake; idle timeouts recycle
    /// until the session expires.
    pub read_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: protocol::DEFAULT_PORT,
            content_dir: PathBuf::from("content"),
            max_connections: 100,
            max_session_age: MAX_SESSION_AGE,
            cleanup_interval: Duration::from_secs(60),
            handshake_timeout: io::HANDSHAKE_TIMEOUT,
            read_timeout: io::READ_TIMEOUT,
        }
    }
}

/// Atomic server counters, shared with the application via
/// [`PixnetServer::stats`].
#[derive(Debug, Default)]
pub struct ServerStats {
    connections: AtomicU64,
    pages_served: AtomicU64,
    errors: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: Arc<AtomicU64>,
}

impl ServerStats {
    /// Consistent-enough point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            pages_served: self.pages_served.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    fn received_handle(&self) -> Arc<AtomicU64> {
        self.bytes_received.clone()
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Plain-value copy of the server counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Total accepted connections.
    pub connections: u64,
    /// Frames successfully sent.
    pub pages_served: u64,
    /// Protocol and transport errors observed.
    pub errors: u64,
    /// Bytes written to clients.
    pub bytes_sent: u64,
    /// Bytes read from clients.
    pub bytes_received: u64,
}

struct ServerShared {
    config: ServerConfig,
    content: ContentRegistry,
    sessions: SessionRegistry,
    stats: Arc<ServerStats>,
    active: AtomicUsize,
}

/// The PIXNET protocol server.
pub struct PixnetServer {
    shared: Arc<ServerShared>,
    shutdown: watch::Sender<bool>,
}

impl PixnetServer {
    /// Creates a server and initializes its content registry.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let content = ContentRegistry::new(&config.content_dir);
        content.initialize()?;
        info!("available pages: {:?}", content.page_names());

        let sessions = SessionRegistry::new(config.max_session_age);
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            shared: Arc::new(ServerShared {
                config,
                content,
                sessions,
                stats: Arc::new(ServerStats::default()),
                active: AtomicUsize::new(0),
            }),
            shutdown,
        })
    }

    /// Binds the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = (self.shared.config.host.as_str(), self.shared.config.port);
        Ok(TcpListener::bind(addr).await?)
    }

    /// Binds and serves until [`shutdown`] is called.
    ///
    /// [`shutdown`]: PixnetServer::shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        info!(
            "PIXNET server listening on {}",
            listener.local_addr().map(|a| a.to_string()).unwrap_or_default()
        );
        self.serve(listener).await
    }

    /// Serves connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(cleanup_loop(
            self.shared.clone(),
            self.shutdown.subscribe(),
        ));

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.accept(stream, peer),
                        Err(e) => {
                            error!("accept error: {e}");
                            ServerStats::bump(&self.shared.stats.errors);
                        }
                    }
                }
            }
        }
        info!("PIXNET server stopped");
        Ok(())
    }

    fn accept(&self, stream: TcpStream, peer: SocketAddr) {
        let shared = self.shared.clone();
        let shutdown_rx = self.shutdown.subscribe();

        if shared.active.load(Ordering::Acquire) >= shared.config.max_connections {
            warn!("refusing {peer}: connection limit reached");
            ServerStats::bump(&shared.stats.errors);
            tokio::spawn(async move {
                let mut stream = stream;
                if let Ok(bytes) = (Message::Error {
                    code: ERR_SERVER_ERROR,
                    message: "connection limit reached".to_string(),
                })
                .encode()
                {
                    let _ = io::write_all(&mut stream, &bytes).await;
                }
            });
            return;
        }

        info!("new connection from {peer}");
        shared.active.fetch_add(1, Ordering::AcqRel);
        ServerStats::bump(&shared.stats.connections);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(&shared, stream, peer, shutdown_rx).await {
                debug!("connection {peer} ended with error: {e}");
            }
            shared.active.fetch_sub(1, Ordering::AcqRel);
            info!("client disconnected: {peer}");
        });
    }

    /// Requests a graceful stop of the accept loop, sweeper and handlers.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Shared atomic counters.
    pub fn stats(&self) -> Arc<ServerStats> {
        self.shared.stats.clone()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Rescans the content directory.
    pub fn reload_content(&self) -> Result<()> {
        self.shared.content.reload()
    }
}

async fn cleanup_loop(shared: Arc<ServerShared>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(shared.config.cleanup_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                for peer in shared.sessions.sweep_expired() {
                    info!("closing expired session from {peer}");
                }
            }
        }
    }
}

/// Per-connection send side: the write half behind its lock, plus what the
/// dispatcher needs to build frames.
struct Connection {
    shared: Arc<ServerShared>,
    token: [u8; 8],
    peer: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    compress: bool,
}

impl Connection {
    /// Writes one encoded message under the send lock.
    async fn send(&self, message: &Message) -> Result<()> {
        let bytes = message.encode()?;
        let mut writer = self.writer.lock().await;
        io::write_all(&mut *writer, &bytes).await?;
        self.shared
            .stats
            .bytes_sent
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Best-effort error notification; failures only logged.
    async fn send_error(&self, code: u16, message: &str) {
        ServerStats::bump(&self.shared.stats.errors);
        let msg = Message::Error {
            code,
            message: message.to_string(),
        };
        if let Err(e) = self.send(&msg).await {
            debug!("could not deliver error to {}: {e}", self.peer);
        }
    }

    /// Sends a page as a full frame, falling back to the index page when the
    /// name is unknown.
    async fn send_page(&self, name: &str) -> Result<()> {
        let resolved = if self.shared.content.contains(name) {
            name
        } else {
            warn!("page not found: {name}, falling back to {INDEX_PAGE}");
            INDEX_PAGE
        };
        let page = self
            .shared
            .content
            .get(resolved)
            .ok_or_else(|| PixnetError::FileNotFound(resolved.to_string()))?;

        let sequence = self
            .shared
            .sessions
            .with_session(&self.token, |session| {
                let sequence = session.sequence;
                session.sequence += 1;
                session.current_page = resolved.to_string();
                sequence
            })
            .ok_or(PixnetError::InvalidSession)?;

        let frame = Frame::from_page(&page, sequence, self.compress);
        self.send(&Message::Frame(frame)).await?;
        ServerStats::bump(&self.shared.stats.pages_served);
        debug!("sent page '{resolved}' (seq {sequence}) to {}", self.peer);
        Ok(())
    }
}

async fn handle_connection(
    shared: &Arc<ServerShared>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = CountingReader::new(read_half, shared.stats.received_handle());

    // Handshake, under the stricter initial deadline.
    let handshake = protocol::read_message(&mut reader, shared.config.handshake_timeout).await;
    let (capabilities, user_agent) = match handshake {
        Ok(Message::Handshake {
            version,
            capabilities,
            user_agent,
        }) => {
            if version != PROTOCOL_VERSION {
                reject(
                    shared,
                    write_half,
                    ERR_UNSUPPORTED_VERSION,
                    &format!("unsupported version: {version}"),
                )
                .await;
                return Ok(());
            }
            (capabilities, user_agent)
        }
        Ok(_) => {
            reject(shared, write_half, ERR_PROTOCOL_ERROR, "expected handshake").await;
            return Ok(());
        }
        Err(e) => {
            ServerStats::bump(&shared.stats.errors);
            return Err(e);
        }
    };
    info!("handshake from {peer}: capabilities={capabilities:#06x}, user-agent={user_agent:?}");

    let (token, session_shutdown) = shared.sessions.create(peer, user_agent);
    let connection = Connection {
        shared: shared.clone(),
        token,
        peer,
        writer: Mutex::new(write_half),
        compress: capabilities & CAP_COMPRESSION != 0,
    };

    let result = drive_session(
        &connection,
        &mut reader,
        &session_shutdown,
        &mut shutdown_rx,
    )
    .await;
    shared.sessions.remove(&token);
    result
}

async fn drive_session<R>(
    connection: &Connection,
    reader: &mut R,
    session_shutdown: &Notify,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    connection
        .send(&Message::Ack {
            version: PROTOCOL_VERSION,
            session_id: connection.token,
            capabilities: CAP_COMPRESSION,
        })
        .await?;
    connection.send_page(INDEX_PAGE).await?;

    let read_timeout = connection.shared.config.read_timeout;
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                connection.send_error(ERR_SERVER_ERROR, "server shutting down").await;
                return Ok(());
            }
            _ = session_shutdown.notified() => {
                info!("session from {} expired", connection.peer);
                return Ok(());
            }
            result = protocol::read_message(reader, read_timeout) => {
                match result {
                    Ok(message) => {
                        if !dispatch(connection, message).await? {
                            return Ok(());
                        }
                    }
                    // An idle read deadline is not an error; expiry is the
                    // sweeper's call.
                    Err(PixnetError::Timeout) => continue,
                    Err(PixnetError::Closed) => return Ok(()),
                    Err(e) => {
                        connection.send_error(e.wire_code(), &e.to_string()).await;
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// Handles one client message. Returns `false` when the session should end.
async fn dispatch(connection: &Connection, message: Message) -> Result<bool> {
    let sessions = &connection.shared.sessions;
    match message {
        Message::Event {
            session_id,
            sequence,
            zone_id,
            name,
            mouse_x,
            mouse_y,
            ..
        } => {
            if session_id != connection.token {
                connection
                    .send_error(protocol::ERR_INVALID_SESSION, "invalid session")
                    .await;
                return Ok(false);
            }
            sessions.with_session(&connection.token, |session| {
                if sequence <= session.client_sequence {
                    warn!(
                        "non-monotonic event sequence from {}: {sequence} after {}",
                        connection.peer, session.client_sequence
                    );
                }
                session.client_sequence = sequence;
                session.touch();
            });
            debug!(
                "event from {}: {name:?} (zone {zone_id}) at ({mouse_x}, {mouse_y})",
                connection.peer
            );

            if let Some(target) = name.strip_prefix("nav_") {
                if connection.shared.content.contains(target) {
                    let from = sessions
                        .with_session(&connection.token, |s| s.current_page.clone())
                        .unwrap_or_default();
                    info!("navigation from {}: {from} -> {target}", connection.peer);
                    connection.send_page(target).await?;
                } else {
                    warn!(
                        "invalid navigation target from {}: {target}",
                        connection.peer
                    );
                }
            }
            Ok(true)
        }
        Message::Input {
            session_id,
            zone_id,
            value,
            ..
        } => {
            if session_id != connection.token {
                connection
                    .send_error(protocol::ERR_INVALID_SESSION, "invalid session")
                    .await;
                return Ok(false);
            }
            debug!("input from {}: zone {zone_id} = {value:?}", connection.peer);
            sessions.with_session(&connection.token, |session| {
                session.input_values.insert(zone_id, value);
                session.touch();
            });
            Ok(true)
        }
        Message::Ping {
            session_id,
            timestamp,
        } => {
            if session_id != connection.token {
                connection
                    .send_error(protocol::ERR_INVALID_SESSION, "invalid session")
                    .await;
                return Ok(false);
            }
            sessions.touch(&connection.token);
            connection
                .send(&Message::Pong {
                    session_id,
                    timestamp,
                })
                .await?;
            Ok(true)
        }
        Message::Bye { .. } => {
            info!("client {} requested disconnect", connection.peer);
            Ok(false)
        }
        Message::Error { code, message } => {
            warn!("client {} reported error {code}: {message}", connection.peer);
            Ok(false)
        }
        other => {
            warn!(
                "unexpected message from {}: {other:?}",
                connection.peer
            );
            connection
                .send_error(ERR_PROTOCOL_ERROR, "unexpected message")
                .await;
            Ok(false)
        }
    }
}

async fn reject(
    shared: &Arc<ServerShared>,
    mut write_half: OwnedWriteHalf,
    code: u16,
    message: &str,
) {
    ServerStats::bump(&shared.stats.errors);
    if let Ok(bytes) = (Message::Error {
        code,
        message: message.to_string(),
    })
    .encode()
    {
        let _ = io::write_all(&mut write_half, &bytes).await;
    }
}

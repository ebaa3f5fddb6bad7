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

//! PIXNET client connection handling.
//!
//! [`PixnetClient::connect`] performs the handshake and spawns a receive
//! task that decodes server messages and publishes [`ClientUpdate`] values
//! on an unbounded channel; the presentation layer (window, canvas,
//! scaling) consumes that channel and is deliberately outside this crate.
//! Outbound operations share one client-to-server sequence counter and
//! write whole messages under the send lock.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Mutex};

use crate::error::{PixnetError, Result};
use crate::io;
use crate::page::Behavior;
use crate::protocol::{self, Frame, Message, CAP_COMPRESSION, PROTOCOL_VERSION};

/// Updates published by the receive task.
#[derive(Debug, Clone)]
pub enum ClientUpdate {
    /// A decoded page frame ready for presentation.
    Frame(Frame),
    /// Echo of a previously sent ping.
    Pong {
        /// The opaque timestamp bytes from the matching ping.
        timestamp: [u8; 8],
    },
    /// An error the server reported.
    ServerError {
        /// Wire error code (1000-1004).
        code: u16,
        /// Human-readable description.
        message: String,
    },
    /// The connection ended; no further updates will arrive.
    Disconnected,
}

/// A connected PIXNET client session.
pub struct PixnetClient {
    session_id: [u8; 8],
    server_capabilities: u16,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    sequence: AtomicU32,
    connected: Arc<AtomicBool>,
}

impl PixnetClient {
    /// Connects, performs the handshake, and spawns the receive task.
    ///
    /// Returns the client handle and the update channel it publishes
    /// decoded frames on.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        user_agent: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientUpdate>)> {
        let stream = tokio::time::timeout(io::HANDSHAKE_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| PixnetError::Timeout)??;
        stream.set_nodelay(true)?;
        let (mut read_half, mut write_half) = stream.into_split();

        let handshake = Message::Handshake {
            version: PROTOCOL_VERSION,
            capabilities: CAP_COMPRESSION,
            user_agent: user_agent.to_string(),
        };
        io::write_all(&mut write_half, &handshake.encode()?).await?;

        let (session_id, server_capabilities) =
            match protocol::read_message(&mut read_half, io::HANDSHAKE_TIMEOUT).await? {
                Message::Ack {
                    version,
                    session_id,
                    capabilities,
                } => {
                    if version != PROTOCOL_VERSION {
                        return Err(PixnetError::UnsupportedVersion(version.into()));
                    }
                    (session_id, capabilities)
                }
                Message::Error { code, message } => {
                    return Err(PixnetError::Protocol(format!(
                        "server rejected handshake ({code}): {message}"
                    )));
                }
                other => {
                    return Err(PixnetError::Protocol(format!(
                        "expected handshake ack, got {other:?}"
                    )));
                }
            };
        info!("connected, session {session_id:02x?}");

        let connected = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(receive_loop(read_half, tx, connected.clone()));

        Ok((
            Self {
                session_id,
                server_capabilities,
                writer: Arc::new(Mutex::new(write_half)),
                sequence: AtomicU32::new(0),
                connected,
            },
            rx,
        ))
    }

    /// The session token issued at handshake.
    pub fn session_id(&self) -> [u8; 8] {
        self.session_id
    }

    /// Capability bits the server advertised.
    pub fn server_capabilities(&self) -> u16 {
        self.server_capabilities
    }

    /// Whether the receive task still considers the connection live.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Sends a zone event. Best-effort: the server does not acknowledge.
    pub async fn send_event(
        &self,
        zone_id: u16,
        event_type: u8,
        name: &str,
        mouse: (u16, u16),
        payload: &[u8],
    ) -> Result<()> {
        let message = Message::Event {
            session_id: self.session_id,
            sequence: self.next_sequence(),
            zone_id,
            event_type,
            timestamp_us: protocol::timestamp_micros(),
            mouse_x: mouse.0,
            mouse_y: mouse.1,
            modifiers: 0,
            name: name.to_string(),
            payload: payload.to_vec(),
        };
        self.send(&message).await
    }

    /// Submits an input-zone value.
    pub async fn send_input(
        &self,
        zone_id: u16,
        input_type: u8,
        validation: u8,
        value: &str,
    ) -> Result<()> {
        let message = Message::Input {
            session_id: self.session_id,
            sequence: self.next_sequence(),
            zone_id,
            input_type,
            validation,
            value: value.to_string(),
        };
        self.send(&message).await
    }

    /// Sends a keepalive probe, returning the timestamp bytes the server
    /// will echo in its [`ClientUpdate::Pong`].
    pub async fn ping(&self) -> Result<[u8; 8]> {
        let timestamp = protocol::timestamp_micros().to_be_bytes();
        self.send(&Message::Ping {
            session_id: self.session_id,
            timestamp,
        })
        .await?;
        Ok(timestamp)
    }

    /// Resolves a pointer position against a frame's category map and emits
    /// the matching event.
    ///
    /// `Navigate` zones emit `nav_<target>`; `EmitEvent` zones emit their
    /// configured name. Returns the activated category id, or `None` when
    /// the position hit no actionable zone (the remaining behaviors belong
    /// to the presentation layer).
    pub async fn pointer_click(&self, frame: &Frame, x: u16, y: u16) -> Result<Option<u16>> {
        let id = frame.category_at(x, y);
        if id == 0 {
            return Ok(None);
        }
        let Some(category) = frame.category(id) else {
            debug!("pointer hit unknown category {id} at ({x}, {y})");
            return Ok(None);
        };
        match &category.behavior {
            Behavior::Navigate { target, .. } => {
                self.send_event(id, 0, &format!("nav_{target}"), (x, y), &[])
                    .await?;
                Ok(Some(id))
            }
            Behavior::EmitEvent {
                name, event_type, ..
            } => {
                self.send_event(id, *event_type, name, (x, y), &[]).await?;
                Ok(Some(id))
            }
            _ => Ok(None),
        }
    }

    /// Sends `PIXBYE` and closes the write side.
    pub async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        let bye = Message::Bye {
            session_id: self.session_id,
            reason: 0,
            reason_text: String::new(),
        };
        let bytes = bye.encode()?;
        let mut writer = self.writer.lock().await;
        io::write_all(&mut *writer, &bytes).await?;
        tokio::io::AsyncWriteExt::shutdown(&mut *writer).await?;
        Ok(())
    }

    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn send(&self, message: &Message) -> Result<()> {
        if !self.is_connected() {
            return Err(PixnetError::Closed);
        }
        let bytes = message.encode()?;
        let mut writer = self.writer.lock().await;
        io::write_all(&mut *writer, &bytes).await
    }
}

async fn receive_loop(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    tx: mpsc::UnboundedSender<ClientUpdate>,
    connected: Arc<AtomicBool>,
) {
    loop {
        match protocol::read_message(&mut reader, io::READ_TIMEOUT).await {
            Ok(Message::Frame(frame)) => {
                debug!(
                    "frame: {}x{}, seq {}, {} categories",
                    frame.width,
                    frame.height,
                    frame.sequence,
                    frame.categories.len()
                );
                if tx.send(ClientUpdate::Frame(frame)).is_err() {
                    break;
                }
            }
            Ok(Message::Pong { timestamp, .. }) => {
                if tx.send(ClientUpdate::Pong { timestamp }).is_err() {
                    break;
                }
            }
            Ok(Message::Error { code, message }) => {
                warn!("server error {code}: {message}");
                if tx.send(ClientUpdate::ServerError { code, message }).is_err() {
                    break;
                }
            }
            Ok(Message::Bye { reason, .. }) => {
                info!("server closed the session (reason {reason})");
                break;
            }
            Ok(other) => {
                error!("unexpected message from server: {other:?}");
                break;
            }
            // A quiet server is not an error; keep listening.
            Err(PixnetError::Timeout) => continue,
            // Corrupt frame: fully consumed by the codec, so skip it and
            // stay in the session.
            Err(e @ PixnetError::ChecksumError { .. }) => {
                error!("discarding frame: {e}");
                continue;
            }
            Err(PixnetError::Closed) => break,
            Err(e) => {
                error!("receive error: {e}");
                break;
            }
        }
    }
    connected.store(false, Ordering::Release);
    let _ = tx.send(ClientUpdate::Disconnected);
}

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

//! Per-client session state and the live-session registry.
//!
//! A session is created on a successful handshake and mutated only through
//! the registry lock: the owning handler updates it per message, and the
//! cleanup sweeper reads it to find expired entries. The sweeper never
//! touches the handler's socket; it signals the handler's [`Notify`] and the
//! handler tears itself down.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::Notify;

/// Default maximum idle time before a session expires.
pub const MAX_SESSION_AGE: Duration = Duration::from_secs(300);

/// State of one connected client.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque 8-byte token issued at handshake, unique among live sessions.
    pub token: [u8; 8],
    /// Remote peer address.
    pub peer: SocketAddr,
    /// Next server-to-client frame sequence number.
    pub sequence: u32,
    /// Highest client-to-server sequence number observed.
    pub client_sequence: u32,
    /// Name of the page most recently sent.
    pub current_page: String,
    /// Latest value submitted per input zone.
    pub input_values: HashMap<u16, String>,
    /// Time of the last valid message from this client.
    pub last_activity: Instant,
    /// Client identification string from the handshake.
    pub user_agent: String,
}

impl Session {
    /// Creates a fresh session positioned at the index page.
    pub fn new(token: [u8; 8], peer: SocketAddr, user_agent: String) -> Self {
        Self {
            token,
            peer,
            sequence: 0,
            client_sequence: 0,
            current_page: "index".to_string(),
            input_values: HashMap::new(),
            last_activity: Instant::now(),
            user_agent,
        }
    }

    /// Marks the session active now.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Whether the session is still live under the given age limit.
    pub fn is_active(&self, max_age: Duration) -> bool {
        self.last_activity.elapsed() < max_age
    }
}

struct SessionEntry {
    session: Session,
    shutdown: Arc<Notify>,
}

/// Registry of live sessions, shared by the accept loop, the per-connection
/// handlers and the cleanup sweeper.
pub struct SessionRegistry {
    max_age: Duration,
    inner: Mutex<HashMap<[u8; 8], SessionEntry>>,
}

impl SessionRegistry {
    /// Creates an empty registry with the given session age limit.
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Generates a token and registers a new session for `peer`.
    ///
    /// Returns the token and the shutdown handle the owning handler must
    /// watch. Tokens come from the OS CSPRNG; the zero token and collisions
    /// with live sessions are rejected and redrawn.
    pub fn create(&self, peer: SocketAddr, user_agent: String) -> ([u8; 8], Arc<Notify>) {
        let mut map = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let token = loop {
            let mut candidate = [0u8; 8];
            OsRng.fill_bytes(&mut candidate);
            if candidate != [0u8; 8] && !map.contains_key(&candidate) {
                break candidate;
            }
        };
        let shutdown = Arc::new(Notify::new());
        map.insert(
            token,
            SessionEntry {
                session: Session::new(token, peer, user_agent),
                shutdown: shutdown.clone(),
            },
        );
        (token, shutdown)
    }

    /// Removes a session, returning its final state.
    pub fn remove(&self, token: &[u8; 8]) -> Option<Session> {
        let mut map = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        map.remove(token).map(|entry| entry.session)
    }

    /// Runs a closure against a live session, refreshing nothing by itself.
    ///
    /// Returns `None` when the token does not name a live session.
    pub fn with_session<T>(&self, token: &[u8; 8], f: impl FnOnce(&mut Session) -> T) -> Option<T> {
        let mut map = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        map.get_mut(token).map(|entry| f(&mut entry.session))
    }

    /// Marks a session active now. Returns false for unknown tokens.
    pub fn touch(&self, token: &[u8; 8]) -> bool {
        self.with_session(token, Session::touch).is_some()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signals every expired session's handler to exit.
    ///
    /// Entries stay registered until their owning handler removes them on
    /// the way out; repeat notifications are harmless.
    pub fn sweep_expired(&self) -> Vec<SocketAddr> {
        let map = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut expired = Vec::new();
        for entry in map.values() {
            if !entry.session.is_active(self.max_age) {
                entry.shutdown.notify_one();
                expired.push(entry.session.peer);
            }
        }
        expired
    }
}

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


//! # pixnet
//!
//! A pure Rust implementation of PIXNET, a stateful client/server protocol
//! for graphical pages: rasterized pixel frames paired with a per-pixel
//! category index that maps pointer coordinates to interactive behaviors
//! (navigation, input zones, event emission).
//!
//! The server loads pages from the PXNT on-disk container format and
//! streams them to clients over a binary TCP protocol; the client renders
//! received frames, translates pointer events into zone-qualified messages,
//! and requests navigation.
//!
//! ## Features
//!
//! - **PXNT container codec**: fixed header, metadata, zlib-compressed
//!   pixel and category planes, category table, optional animation, audio
//!   and extension sections, round-trip exact
//! - **Binary wire protocol**: 9 message types with big-endian framing,
//!   CRC32 frame checksums and length-prefixed compressed pixel planes
//! - **Session management**: cryptographically random 8-byte tokens,
//!   per-direction sequence counters, background expiry sweeping
//! - **Async I/O**: built on Tokio with one handler task per client and
//!   per-socket write atomicity
//!
//! ## Quick Start
//!
//! ```no_run
//! use pixnet::{PixnetServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Serve *.pxnt pages from ./content on the default port
//!     let server = PixnetServer::new(ServerConfig::default())?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! Connecting and navigating from the client side:
//!
//! ```no_run
//! use pixnet::{ClientUpdate, PixnetClient};
//!
//! # async fn demo() -> pixnet::Result<()> {
//! let (client, mut updates) = PixnetClient::connect("127.0.0.1:7621", "demo").await?;
//! while let Some(update) = updates.recv().await {
//!     if let ClientUpdate::Frame(frame) = update {
//!         // A pointer click resolves against the frame's category map.
//!         client.pointer_click(&frame, 60, 110).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! PXNT file ── pxnt codec ──▶ Page ── wire codec ──▶ TCP stream
//!                                                        │
//!                 server ◀── PIXEVT/PIXINP/PIXPNG ── client
//!                   │                                    │
//!             navigation                          Frame + hit test
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod content;
pub mod error;
pub mod page;
pub mod protocol;
pub mod pxnt;
pub mod sample;
pub mod server;
pub mod session;

// Internal modules
mod io;
mod zlib;

// Re-exports
pub use client::{ClientUpdate, PixnetClient};
pub use content::ContentRegistry;
pub use error::{PixnetError, Result};
pub use page::{Behavior, Category, Page, PageMetadata, PixelFormat};
pub use protocol::{Frame, Message, DEFAULT_PORT, PROTOCOL_VERSION};
pub use server::{PixnetServer, ServerConfig, ServerStats, StatsSnapshot};
pub use session::{Session, SessionRegistry, MAX_SESSION_AGE};

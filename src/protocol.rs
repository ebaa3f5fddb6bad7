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

//! PIXNET wire protocol constants, messages and codec.
//!
//! Every message opens with a 6-byte ASCII magic followed by a fixed body
//! and an optional variable tail; integers are big-endian (the PXNT
//! container is little-endian — the two never mix). The closed [`Message`]
//! sum type carries one variant per magic, so server dispatch is a single
//! `match`.
//!
//! # Protocol flow
//!
//! 1. **Handshake** — client sends `PIXHND`, server answers `PIXACK` with a
//!    fresh session token
//! 2. **Initial frame** — server pushes the `index` page as a `PIXNET` frame
//! 3. **Normal operation** — events, input, ping/pong and navigation frames
//!    until either side sends `PIXBYE` or the session expires

use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{PixnetError, Result};
use crate::io;
use crate::page::{Behavior, Category, Page};
use crate::zlib;

/// Wire protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default PIXNET TCP port.
pub const DEFAULT_PORT: u16 = 7621;

/// Message magic: server-to-client page frame.
pub const MAGIC_FRAME: &[u8; 6] = b"PIXNET";
/// Message magic: client handshake.
pub const MAGIC_HANDSHAKE: &[u8; 6] = b"PIXHND";
/// Message magic: server handshake acknowledgment.
pub const MAGIC_ACK: &[u8; 6] = b"PIXACK";
/// Message magic: client zone event.
pub const MAGIC_EVENT: &[u8; 6] = b"PIXEVT";
/// Message magic: client input-zone value.
pub const MAGIC_INPUT: &[u8; 6] = b"PIXINP";
/// Message magic: client keepalive probe.
pub const MAGIC_PING: &[u8; 6] = b"PIXPNG";
/// Message magic: server keepalive echo.
pub const MAGIC_PONG: &[u8; 6] = b"PIXPOG";
/// Message magic: error notification, either direction.
pub const MAGIC_ERROR: &[u8; 6] = b"PIXERR";
/// Message magic: graceful teardown, either direction.
pub const MAGIC_BYE: &[u8; 6] = b"PIXBYE";

/// Wire error code: malformed or unexpected message.
pub const ERR_PROTOCOL_ERROR: u16 = 1000;
/// Wire error code: peer speaks an unknown protocol version.
pub const ERR_UNSUPPORTED_VERSION: u16 = 1001;
/// Wire error code: message carried an unknown session token.
pub const ERR_INVALID_SESSION: u16 = 1002;
/// Wire error code: requested page does not exist.
pub const ERR_FILE_NOT_FOUND: u16 = 1003;
/// Wire error code: internal server failure.
pub const ERR_SERVER_ERROR: u16 = 1004;

/// Frame type: complete page replacing the current display.
pub const FRAME_FULL: u8 = 0;
/// Frame type: partial region update.
pub const FRAME_PARTIAL: u8 = 1;
/// Frame type: animation frame.
pub const FRAME_ANIMATION: u8 = 2;

/// Capability bit: peer supports zlib-compressed pixel planes.
pub const CAP_COMPRESSION: u16 = 0x01;

/// Frame flag: pixel plane is a length-prefixed zlib block.
pub const FRAME_FLAG_COMPRESSED: u16 = 0x01;

/// Upper bound on a frame's pixel plane (raw or compressed), guarding
/// against hostile headers.
const MAX_PIXEL_PLANE: usize = 1 << 26;

/// A decoded `PIXNET` frame: one full page as delivered to a client.
///
/// `pixels` is always the decompressed RGBA8 plane; `category_map` is kept
/// in wire order (big-endian u16 pairs), which is what the pointer hit test
/// reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type tag ([`FRAME_FULL`] for whole pages).
    pub frame_type: u8,
    /// Server-side per-session sequence number.
    pub sequence: u32,
    /// Send time, microseconds since the Unix epoch.
    pub timestamp_us: u64,
    /// Frame flag bits.
    pub flags: u16,
    /// Protocol version the frame was encoded with.
    pub version: u8,
    /// Frame width in pixels.
    pub width: u16,
    /// Frame height in pixels.
    pub height: u16,
    /// Pixel format tag (0 = RGBA8).
    pub format: u8,
    /// RGBA8 pixel plane, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
    /// Per-pixel category ids, big-endian u16 pairs.
    pub category_map: Vec<u8>,
    /// Category table for this frame.
    pub categories: Vec<Category>,
}

impl Frame {
    /// Builds a full-page frame from a decoded page.
    ///
    /// The container keeps the category map little-endian; the wire is
    /// big-endian, so the map is byte-swapped here.
    pub fn from_page(page: &Page, sequence: u32, compress: bool) -> Self {
        let mut category_map = Vec::with_capacity(page.category_map.len());
        for pair in page.category_map.chunks_exact(2) {
            category_map.push(pair[1]);
            category_map.push(pair[0]);
        }
        Frame {
            frame_type: FRAME_FULL,
            sequence,
            timestamp_us: timestamp_micros(),
            flags: if compress { FRAME_FLAG_COMPRESSED } else { 0 },
            version: PROTOCOL_VERSION,
            width: page.width,
            height: page.height,
            format: 0,
            pixels: page.pixels.clone(),
            category_map,
            categories: page.categories.clone(),
        }
    }

    /// Category id under the given frame coordinate, or 0 when out of
    /// bounds.
    pub fn category_at(&self, x: u16, y: u16) -> u16 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 2;
        u16::from_be_bytes([self.category_map[idx], self.category_map[idx + 1]])
    }

    /// Looks up a category record by id.
    pub fn category(&self, id: u16) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }
}

/// One PIXNET protocol message, tagged by its wire magic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `PIXHND`: client opens a session.
    Handshake {
        /// Protocol version the client speaks.
        version: u8,
        /// Client capability bits.
        capabilities: u16,
        /// Client identification string, at most 255 bytes.
        user_agent: String,
    },
    /// `PIXACK`: server accepts the handshake.
    Ack {
        /// Protocol version the server speaks.
        version: u8,
        /// Opaque session token, nonzero.
        session_id: [u8; 8],
        /// Server capability bits.
        capabilities: u16,
    },
    /// `PIXNET`: server delivers a page frame.
    Frame(Frame),
    /// `PIXEVT`: client reports a zone interaction.
    Event {
        /// Session token issued at handshake.
        session_id: [u8; 8],
        /// Client-side sequence number.
        sequence: u32,
        /// Category id of the zone, 0 when none.
        zone_id: u16,
        /// Application-defined event type tag.
        event_type: u8,
        /// Client send time, microseconds since the Unix epoch.
        timestamp_us: u64,
        /// Pointer position in frame coordinates.
        mouse_x: u16,
        /// Pointer position in frame coordinates.
        mouse_y: u16,
        /// Modifier-key bitmask.
        modifiers: u8,
        /// Event name, at most 255 bytes; `nav_*` names request navigation.
        name: String,
        /// Opaque payload, at most 65535 bytes.
        payload: Vec<u8>,
    },
    /// `PIXINP`: client submits an input-zone value.
    Input {
        /// Session token issued at handshake.
        session_id: [u8; 8],
        /// Client-side sequence number.
        sequence: u32,
        /// Category id of the input zone.
        zone_id: u16,
        /// Application-defined input type tag.
        input_type: u8,
        /// Client-side validation status.
        validation: u8,
        /// UTF-8 value, at most 65535 bytes.
        value: String,
    },
    /// `PIXPNG`: client keepalive probe.
    Ping {
        /// Session token issued at handshake.
        session_id: [u8; 8],
        /// Opaque bytes echoed back verbatim.
        timestamp: [u8; 8],
    },
    /// `PIXPOG`: server keepalive echo.
    Pong {
        /// Session token issued at handshake.
        session_id: [u8; 8],
        /// The probe's timestamp bytes, unchanged.
        timestamp: [u8; 8],
    },
    /// `PIXERR`: error notification.
    Error {
        /// Wire error code (1000-1004).
        code: u16,
        /// Human-readable description.
        message: String,
    },
    /// `PIXBYE`: graceful session teardown.
    Bye {
        /// Session token issued at handshake.
        session_id: [u8; 8],
        /// Reason code, 0 for a normal close.
        reason: u8,
        /// Optional human-readable reason, at most 255 bytes.
        reason_text: String,
    },
}

impl Message {
    /// Serializes the message to wire bytes.
    ///
    /// Fails with [`PixnetError::Protocol`] when a variable field exceeds
    /// the width of its length prefix.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        match self {
            Message::Handshake {
                version,
                capabilities,
                user_agent,
            } => {
                check_len("user agent", user_agent.len(), u8::MAX as usize)?;
                buf.put_slice(MAGIC_HANDSHAKE);
                buf.put_u8(*version);
                buf.put_u16(*capabilities);
                buf.put_u8(user_agent.len() as u8);
                buf.put_slice(user_agent.as_bytes());
            }
            Message::Ack {
                version,
                session_id,
                capabilities,
            } => {
                buf.put_slice(MAGIC_ACK);
                buf.put_u8(*version);
                buf.put_slice(session_id);
                buf.put_u16(*capabilities);
            }
            Message::Frame(frame) => encode_frame(&mut buf, frame)?,
            Message::Event {
                session_id,
                sequence,
                zone_id,
                event_type,
                timestamp_us,
                mouse_x,
                mouse_y,
                modifiers,
                name,
                payload,
            } => {
                check_len("event name", name.len(), u8::MAX as usize)?;
                check_len("event payload", payload.len(), u16::MAX as usize)?;
                buf.put_slice(MAGIC_EVENT);
                buf.put_slice(session_id);
                buf.put_u32(*sequence);
                buf.put_u16(*zone_id);
                buf.put_u8(*event_type);
                buf.put_u64(*timestamp_us);
                buf.put_u16(*mouse_x);
                buf.put_u16(*mouse_y);
                buf.put_u8(*modifiers);
                buf.put_u8(name.len() as u8);
                buf.put_u16(payload.len() as u16);
                buf.put_slice(name.as_bytes());
                buf.put_slice(payload);
            }
            Message::Input {
                session_id,
                sequence,
                zone_id,
                input_type,
                validation,
                value,
            } => {
                check_len("input value", value.len(), u16::MAX as usize)?;
                buf.put_slice(MAGIC_INPUT);
                buf.put_slice(session_id);
                buf.put_u32(*sequence);
                buf.put_u16(*zone_id);
                buf.put_u8(*input_type);
                buf.put_u8(*validation);
                buf.put_u16(value.len() as u16);
                buf.put_slice(value.as_bytes());
            }
            Message::Ping {
                session_id,
                timestamp,
            } => {
                buf.put_slice(MAGIC_PING);
                buf.put_slice(session_id);
                buf.put_slice(timestamp);
            }
            Message::Pong {
                session_id,
                timestamp,
            } => {
                buf.put_slice(MAGIC_PONG);
                buf.put_slice(session_id);
                buf.put_slice(timestamp);
            }
            Message::Error { code, message } => {
                check_len("error message", message.len(), u16::MAX as usize)?;
                buf.put_slice(MAGIC_ERROR);
                buf.put_u16(*code);
                buf.put_u16(message.len() as u16);
                buf.put_slice(message.as_bytes());
            }
            Message::Bye {
                session_id,
                reason,
                reason_text,
            } => {
                check_len("bye reason", reason_text.len(), u8::MAX as usize)?;
                buf.put_slice(MAGIC_BYE);
                buf.put_slice(session_id);
                buf.put_u8(*reason);
                buf.put_u8(reason_text.len() as u8);
                buf.put_slice(reason_text.as_bytes());
            }
        }
        Ok(buf.to_vec())
    }
}

fn check_len(what: &str, len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(PixnetError::Protocol(format!(
            "{what} too long: {len} bytes (max {max})"
        )));
    }
    Ok(())
}

fn encode_frame(buf: &mut BytesMut, frame: &Frame) -> Result<()> {
    let pixel_block = if frame.flags & FRAME_FLAG_COMPRESSED != 0 {
        zlib::compress(&frame.pixels)
    } else {
        frame.pixels.clone()
    };
    let checksum = zlib::crc32(&[&pixel_block, &frame.category_map]);

    buf.put_slice(MAGIC_FRAME);
    buf.put_u8(frame.frame_type);
    buf.put_u32(frame.sequence);
    buf.put_u64(frame.timestamp_us);
    buf.put_u16(frame.flags);
    buf.put_u8(frame.version);
    buf.put_u16(frame.width);
    buf.put_u16(frame.height);
    buf.put_u8(frame.format);
    buf.put_u32(checksum);

    if frame.flags & FRAME_FLAG_COMPRESSED != 0 {
        buf.put_u32(pixel_block.len() as u32);
    }
    buf.put_slice(&pixel_block);
    buf.put_slice(&frame.category_map);

    check_len("category table", frame.categories.len(), u16::MAX as usize)?;
    buf.put_u16(frame.categories.len() as u16);
    for category in &frame.categories {
        check_len("category name", category.name.len(), u8::MAX as usize)?;
        let data = category.behavior.encode_data();
        check_len("behavior data", data.len(), u16::MAX as usize)?;
        buf.put_u16(category.id);
        buf.put_u8(category.name.len() as u8);
        buf.put_slice(category.name.as_bytes());
        buf.put_u8(category.behavior.id());
        buf.put_u8(category.priority);
        buf.put_u16(data.len() as u16);
        buf.put_slice(&data);
    }
    Ok(())
}

/// Reads one complete message from the stream, dispatching on the 6-byte
/// magic.
///
/// Each underlying exact-size read gets the given deadline. The message is
/// consumed in full even when its payload fails verification, so the caller
/// may keep reading after a [`PixnetError::ChecksumError`].
pub async fn read_message<R>(reader: &mut R, deadline: Duration) -> Result<Message>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let magic_bytes = io::read_exact(reader, 6, deadline).await?;
    let mut magic = [0u8; 6];
    magic.copy_from_slice(&magic_bytes);

    match &magic {
        m if m == MAGIC_HANDSHAKE => read_handshake(reader, deadline).await,
        m if m == MAGIC_ACK => read_ack(reader, deadline).await,
        m if m == MAGIC_FRAME => read_frame(reader, deadline).await,
        m if m == MAGIC_EVENT => read_event(reader, deadline).await,
        m if m == MAGIC_INPUT => read_input(reader, deadline).await,
        m if m == MAGIC_PING => read_ping(reader, deadline, true).await,
        m if m == MAGIC_PONG => read_ping(reader, deadline, false).await,
        m if m == MAGIC_ERROR => read_error(reader, deadline).await,
        m if m == MAGIC_BYE => read_bye(reader, deadline).await,
        _ => Err(PixnetError::BadMagic(magic.to_vec())),
    }
}

async fn read_handshake<R>(reader: &mut R, deadline: Duration) -> Result<Message>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let fixed = io::read_exact(reader, 4, deadline).await?;
    let mut buf = &fixed[..];
    let version = buf.get_u8();
    let capabilities = buf.get_u16();
    let ua_len = buf.get_u8() as usize;
    let ua = io::read_exact(reader, ua_len, deadline).await?;
    Ok(Message::Handshake {
        version,
        capabilities,
        user_agent: String::from_utf8_lossy(&ua).into_owned(),
    })
}

async fn read_ack<R>(reader: &mut R, deadline: Duration) -> Result<Message>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let fixed = io::read_exact(reader, 11, deadline).await?;
    let mut buf = &fixed[..];
    let version = buf.get_u8();
    let mut session_id = [0u8; 8];
    buf.copy_to_slice(&mut session_id);
    let capabilities = buf.get_u16();
    Ok(Message::Ack {
        version,
        session_id,
        capabilities,
    })
}

async fn read_frame<R>(reader: &mut R, deadline: Duration) -> Result<Message>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let fixed = io::read_exact(reader, 25, deadline).await?;
    let mut buf = &fixed[..];
    let frame_type = buf.get_u8();
    let sequence = buf.get_u32();
    let timestamp_us = buf.get_u64();
    let flags = buf.get_u16();
    let version = buf.get_u8();
    let width = buf.get_u16();
    let height = buf.get_u16();
    let format = buf.get_u8();
    let checksum = buf.get_u32();

    if format != 0 {
        return Err(PixnetError::Protocol(format!(
            "unsupported frame pixel format: {format}"
        )));
    }
    let pixel_len = width as usize * height as usize * 4;
    let map_len = width as usize * height as usize * 2;
    if pixel_len > MAX_PIXEL_PLANE {
        return Err(PixnetError::Protocol(format!(
            "frame too large: {width}x{height}"
        )));
    }

    let pixel_block = if flags & FRAME_FLAG_COMPRESSED != 0 {
        let len_bytes = io::read_exact(reader, 4, deadline).await?;
        let block_len =
            u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        if block_len > MAX_PIXEL_PLANE {
            return Err(PixnetError::Protocol(format!(
                "compressed pixel block too large: {block_len} bytes"
            )));
        }
        io::read_exact(reader, block_len, deadline).await?
    } else {
        io::read_exact(reader, pixel_len, deadline).await?
    };
    let category_map = io::read_exact(reader, map_len, deadline).await?;
    let categories = read_category_table(reader, deadline).await?;

    // The whole frame is consumed before verification so the stream stays
    // aligned when the frame is discarded.
    let actual = zlib::crc32(&[&pixel_block, &category_map]);
    if actual != checksum {
        return Err(PixnetError::ChecksumError {
            expected: checksum,
            actual,
        });
    }

    let pixels = if flags & FRAME_FLAG_COMPRESSED != 0 {
        zlib::decompress(&pixel_block)?
    } else {
        pixel_block
    };
    if pixels.len() != pixel_len {
        return Err(PixnetError::PixelSizeMismatch {
            expected: pixel_len,
            actual: pixels.len(),
        });
    }

    Ok(Message::Frame(Frame {
        frame_type,
        sequence,
        timestamp_us,
        flags,
        version,
        width,
        height,
        format,
        pixels,
        category_map,
        categories,
    }))
}

async fn read_category_table<R>(reader: &mut R, deadline: Duration) -> Result<Vec<Category>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let count_bytes = io::read_exact(reader, 2, deadline).await?;
    let count = u16::from_be_bytes([count_bytes[0], count_bytes[1]]);
    let mut categories = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let head = io::read_exact(reader, 3, deadline).await?;
        let id = u16::from_be_bytes([head[0], head[1]]);
        let name_len = head[2] as usize;
        let name = io::read_exact(reader, name_len, deadline).await?;
        let tail = io::read_exact(reader, 4, deadline).await?;
        let behavior_id = tail[0];
        let priority = tail[1];
        let data_len = u16::from_be_bytes([tail[2], tail[3]]) as usize;
        let data = io::read_exact(reader, data_len, deadline).await?;
        categories.push(Category {
            id,
            name: String::from_utf8_lossy(&name).into_owned(),
            priority,
            behavior: Behavior::parse(behavior_id, &data)?,
        });
    }
    Ok(categories)
}

async fn read_event<R>(reader: &mut R, deadline: Duration) -> Result<Message>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let fixed = io::read_exact(reader, 28, deadline).await?;
    let mut buf = &fixed[..];
    let mut session_id = [0u8; 8];
    buf.copy_to_slice(&mut session_id);
    let sequence = buf.get_u32();
    let zone_id = buf.get_u16();
    let event_type = buf.get_u8();
    let timestamp_us = buf.get_u64();
    let mouse_x = buf.get_u16();
    let mouse_y = buf.get_u16();
    let modifiers = buf.get_u8();

    let lens = io::read_exact(reader, 3, deadline).await?;
    let name_len = lens[0] as usize;
    let payload_len = u16::from_be_bytes([lens[1], lens[2]]) as usize;
    let name = io::read_exact(reader, name_len, deadline).await?;
    let payload = io::read_exact(reader, payload_len, deadline).await?;

    Ok(Message::Event {
        session_id,
        sequence,
        zone_id,
        event_type,
        timestamp_us,
        mouse_x,
        mouse_y,
        modifiers,
        name: String::from_utf8_lossy(&name).into_owned(),
        payload,
    })
}

async fn read_input<R>(reader: &mut R, deadline: Duration) -> Result<Message>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let fixed = io::read_exact(reader, 18, deadline).await?;
    let mut buf = &fixed[..];
    let mut session_id = [0u8; 8];
    buf.copy_to_slice(&mut session_id);
    let sequence = buf.get_u32();
    let zone_id = buf.get_u16();
    let input_type = buf.get_u8();
    let validation = buf.get_u8();
    let payload_len = buf.get_u16() as usize;
    let payload = io::read_exact(reader, payload_len, deadline).await?;
    Ok(Message::Input {
        session_id,
        sequence,
        zone_id,
        input_type,
        validation,
        value: String::from_utf8_lossy(&payload).into_owned(),
    })
}

async fn read_ping<R>(reader: &mut R, deadline: Duration, is_ping: bool) -> Result<Message>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let fixed = io::read_exact(reader, 16, deadline).await?;
    let mut session_id = [0u8; 8];
    let mut timestamp = [0u8; 8];
    session_id.copy_from_slice(&fixed[..8]);
    timestamp.copy_from_slice(&fixed[8..]);
    Ok(if is_ping {
        Message::Ping {
            session_id,
            timestamp,
        }
    } else {
        Message::Pong {
            session_id,
            timestamp,
        }
    })
}

async fn read_error<R>(reader: &mut R, deadline: Duration) -> Result<Message>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let fixed = io::read_exact(reader, 4, deadline).await?;
    let mut buf = &fixed[..];
    let code = buf.get_u16();
    let msg_len = buf.get_u16() as usize;
    let message = io::read_exact(reader, msg_len, deadline).await?;
    Ok(Message::Error {
        code,
        message: String::from_utf8_lossy(&message).into_owned(),
    })
}

async fn read_bye<R>(reader: &mut R, deadline: Duration) -> Result<Message>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let fixed = io::read_exact(reader, 10, deadline).await?;
    let mut session_id = [0u8; 8];
    session_id.copy_from_slice(&fixed[..8]);
    let reason = fixed[8];
    let reason_len = fixed[9] as usize;
    let reason_text = io::read_exact(reader, reason_len, deadline).await?;
    Ok(Message::Bye {
        session_id,
        reason,
        reason_text: String::from_utf8_lossy(&reason_text).into_owned(),
    })
}

/// Microseconds since the Unix epoch, saturating at zero for a pre-epoch
/// clock.
pub(crate) fn timestamp_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{Compression, PageMetadata, PixelFormat};

    const DEADLINE: Duration = Duration::from_secs(1);

    async fn round_trip(message: Message) -> Message {
        let bytes = message.encode().unwrap();
        let mut reader = &bytes[..];
        let decoded = read_message(&mut reader, DEADLINE).await.unwrap();
        assert!(reader.is_empty(), "decoder left trailing bytes");
        decoded
    }

    fn test_frame(compress: bool) -> Frame {
        let page = Page {
            width: 3,
            height: 2,
            pixel_format: PixelFormat::Rgba8,
            compression: Compression::None,
            flags: 0,
            created: 0,
            modified: 0,
            metadata: PageMetadata::default(),
            pixels: (0..24u8).collect(),
            category_map: {
                let mut map = vec![0u8; 12];
                map[0..2].copy_from_slice(&5u16.to_le_bytes());
                map
            },
            categories: vec![Category {
                id: 5,
                name: "go_about".into(),
                priority: 200,
                behavior: Behavior::Navigate {
                    target: "about".into(),
                    debounce_ms: 100,
                },
            }],
            animation: Vec::new(),
            audio: None,
            extended_metadata: Vec::new(),
        };
        Frame::from_page(&page, 7, compress)
    }

    #[tokio::test]
    async fn handshake_round_trip() {
        let message = Message::Handshake {
            version: PROTOCOL_VERSION,
            capabilities: CAP_COMPRESSION,
            user_agent: "tst".into(),
        };
        assert_eq!(round_trip(message.clone()).await, message);
    }

    #[tokio::test]
    async fn ack_is_exactly_17_bytes() {
        let message = Message::Ack {
            version: PROTOCOL_VERSION,
            session_id: [1, 2, 3, 4, 5, 6, 7, 8],
            capabilities: CAP_COMPRESSION,
        };
        let bytes = message.encode().unwrap();
        assert_eq!(bytes.len(), 17);
        assert_eq!(round_trip(message.clone()).await, message);
    }

    #[tokio::test]
    async fn frame_round_trip_raw_and_compressed() {
        for compress in [false, true] {
            let frame = test_frame(compress);
            let decoded = round_trip(Message::Frame(frame.clone())).await;
            match decoded {
                Message::Frame(got) => {
                    assert_eq!(got.pixels, frame.pixels);
                    assert_eq!(got.category_map, frame.category_map);
                    assert_eq!(got.categories, frame.categories);
                    assert_eq!(got.sequence, 7);
                }
                other => panic!("expected frame, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn frame_map_is_wire_big_endian() {
        let frame = test_frame(false);
        // Container map said category 5 at (0, 0) in little-endian.
        assert_eq!(frame.category_map[0], 0);
        assert_eq!(frame.category_map[1], 5);
        assert_eq!(frame.category_at(0, 0), 5);
        assert_eq!(frame.category_at(2, 1), 0);
        assert_eq!(frame.category(5).unwrap().name, "go_about");
    }

    #[tokio::test]
    async fn frame_checksum_mismatch_is_detected() {
        let frame = test_frame(false);
        let mut bytes = Message::Frame(frame).encode().unwrap();
        // Flip one byte of the raw pixel plane, which starts after the
        // 31-byte header.
        bytes[31] ^= 0xFF;
        let mut reader = &bytes[..];
        let err = read_message(&mut reader, DEADLINE).await.unwrap_err();
        assert!(matches!(err, PixnetError::ChecksumError { .. }));
        // The frame was consumed in full despite the failure.
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn event_round_trip_and_field_order() {
        let message = Message::Event {
            session_id: [9; 8],
            sequence: 3,
            zone_id: 12,
            event_type: 0,
            timestamp_us: 1_700_000_000_000_000,
            mouse_x: 100,
            mouse_y: 200,
            modifiers: 0x04,
            name: "nav_about".into(),
            payload: vec![0xAA, 0xBB],
        };
        let bytes = message.encode().unwrap();
        // Fixed body is 28 bytes after the magic; then name_len, payload_len,
        // name, payload.
        assert_eq!(bytes[34], 9); // name_len
        assert_eq!(&bytes[35..37], &2u16.to_be_bytes()); // payload_len
        assert_eq!(&bytes[37..46], b"nav_about");
        assert_eq!(&bytes[46..48], &[0xAA, 0xBB]);
        assert_eq!(round_trip(message.clone()).await, message);
    }

    #[tokio::test]
    async fn input_round_trip() {
        let message = Message::Input {
            session_id: [2; 8],
            sequence: 10,
            zone_id: 4,
            input_type: 1,
            validation: 0,
            value: "user text".into(),
        };
        assert_eq!(round_trip(message.clone()).await, message);
    }

    #[tokio::test]
    async fn ping_pong_echo_timestamp() {
        let timestamp = [0xDE, 0xAD, 0xBE, 0xEF, 1, 2, 3, 4];
        let ping = Message::Ping {
            session_id: [7; 8],
            timestamp,
        };
        match round_trip(ping).await {
            Message::Ping { timestamp: got, .. } => assert_eq!(got, timestamp),
            other => panic!("expected ping, got {other:?}"),
        }
        let pong = Message::Pong {
            session_id: [7; 8],
            timestamp,
        };
        assert_eq!(round_trip(pong.clone()).await, pong);
    }

    #[tokio::test]
    async fn error_and_bye_round_trip() {
        let error = Message::Error {
            code: ERR_FILE_NOT_FOUND,
            message: "no such page".into(),
        };
        assert_eq!(round_trip(error.clone()).await, error);

        let bye = Message::Bye {
            session_id: [3; 8],
            reason: 0,
            reason_text: "done".into(),
        };
        assert_eq!(round_trip(bye.clone()).await, bye);
    }

    #[tokio::test]
    async fn unknown_magic_is_rejected() {
        let mut reader = &b"XXXXXX"[..];
        let err = read_message(&mut reader, DEADLINE).await.unwrap_err();
        assert!(matches!(err, PixnetError::BadMagic(m) if m == b"XXXXXX"));
    }

    #[tokio::test]
    async fn oversize_event_name_is_rejected_at_encode() {
        let message = Message::Event {
            session_id: [0; 8],
            sequence: 0,
            zone_id: 0,
            event_type: 0,
            timestamp_us: 0,
            mouse_x: 0,
            mouse_y: 0,
            modifiers: 0,
            name: "x".repeat(300),
            payload: Vec::new(),
        };
        assert!(matches!(
            message.encode(),
            Err(PixnetError::Protocol(_))
        ));
    }
}

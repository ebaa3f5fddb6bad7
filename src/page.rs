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

//! Decoded page model shared by the container codec and the wire protocol.
//!
//! A [`Page`] is the in-memory form of one PXNT file: a pixel plane, a
//! parallel category map, the category table, and the optional animation,
//! audio and extended-metadata sections. Pages are immutable after decoding;
//! the content registry swaps whole pages on reload.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{PixnetError, Result};

/// Pixel layout of a stored plane.
///
/// Decoded pages always materialize pixels as RGBA8 regardless of the stored
/// format; this tag records what the container carries so encoding can
/// reproduce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 4 bytes per pixel, 8-bit channels.
    Rgba8,
    /// 3 bytes per pixel, no alpha; inflated to RGBA8 with alpha 255.
    Rgb8,
    /// 8 bytes per pixel, 16-bit little-endian channels; narrowed to RGBA8.
    Rgba16,
}

impl PixelFormat {
    /// Parses the container/wire format tag.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PixelFormat::Rgba8),
            1 => Ok(PixelFormat::Rgb8),
            2 => Ok(PixelFormat::Rgba16),
            other => Err(PixnetError::Protocol(format!(
                "unknown pixel format: {other}"
            ))),
        }
    }

    /// Format tag as stored on disk and on the wire.
    pub fn as_u8(self) -> u8 {
        match self {
            PixelFormat::Rgba8 => 0,
            PixelFormat::Rgb8 => 1,
            PixelFormat::Rgba16 => 2,
        }
    }

    /// Bytes per pixel in the stored (container) representation.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba16 => 8,
        }
    }
}

/// Compression applied to container planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Planes stored raw.
    None,
    /// Planes stored as zlib streams.
    Zlib,
}

impl Compression {
    /// Parses the container compression tag.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Zlib),
            other => Err(PixnetError::Protocol(format!(
                "unsupported compression: {other}"
            ))),
        }
    }

    /// Compression tag as stored on disk.
    pub fn as_u8(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Zlib => 1,
        }
    }
}

/// Descriptive metadata attached to a page.
///
/// Custom fields keep their container order so re-encoding a decoded page is
/// byte-stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    /// Page title, UTF-8, at most 65535 bytes.
    pub title: String,
    /// Author, UTF-8, at most 255 bytes.
    pub author: String,
    /// Free-form description, at most 65535 bytes.
    pub description: String,
    /// Canonical URL, at most 65535 bytes.
    pub url: String,
    /// Up to 255 keywords of up to 255 bytes each.
    pub keywords: Vec<String>,
    /// Up to 255 custom fields; keys up to 255 bytes, values up to 65535.
    pub custom_fields: Vec<(String, String)>,
}

/// Action bound to a category, tagged by the on-disk behavior id (0-9).
///
/// `Navigate` and `EmitEvent` have specified subformats and are parsed; the
/// remaining zone behaviors are interpreted by the presentation layer and
/// pass through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    /// Inert pixels (id 0). The reserved category id 0 always behaves as if
    /// it carried this.
    None,
    /// Clicking requests the named page (id 1).
    Navigate {
        /// Target page name.
        target: String,
        /// Minimum interval between repeated activations.
        debounce_ms: u16,
    },
    /// Clicking emits a named application event (id 2).
    EmitEvent {
        /// Event name sent to the server.
        name: String,
        /// Application-defined event type tag.
        event_type: u8,
        /// Minimum interval between repeated activations.
        debounce_ms: u16,
    },
    /// Text input zone (id 3), payload opaque.
    InputZone(Vec<u8>),
    /// Hover effect (id 4), payload opaque.
    HoverEffect(Vec<u8>),
    /// Click effect (id 5), payload opaque.
    ClickEffect(Vec<u8>),
    /// Drag source (id 6), payload opaque.
    DragZone(Vec<u8>),
    /// Drop target (id 7), payload opaque.
    DropZone(Vec<u8>),
    /// Scrollable region (id 8), payload opaque.
    ScrollZone(Vec<u8>),
    /// Embedded media region (id 9), payload opaque.
    MediaZone(Vec<u8>),
}

impl Behavior {
    /// The on-disk behavior id.
    pub fn id(&self) -> u8 {
        match self {
            Behavior::None => 0,
            Behavior::Navigate { .. } => 1,
            Behavior::EmitEvent { .. } => 2,
            Behavior::InputZone(_) => 3,
            Behavior::HoverEffect(_) => 4,
            Behavior::ClickEffect(_) => 5,
            Behavior::DragZone(_) => 6,
            Behavior::DropZone(_) => 7,
            Behavior::ScrollZone(_) => 8,
            Behavior::MediaZone(_) => 9,
        }
    }

    /// Parses a behavior payload for the given id.
    ///
    /// Payload integers are little-endian: behavior data belongs to the
    /// container, which is little-endian throughout, and travels over the
    /// wire as raw bytes.
    pub fn parse(id: u8, data: &[u8]) -> Result<Self> {
        match id {
            0 => {
                if !data.is_empty() {
                    return Err(PixnetError::Protocol(
                        "behavior 0 carries no payload".into(),
                    ));
                }
                Ok(Behavior::None)
            }
            1 => {
                let mut buf = data;
                let target = take_short_string(&mut buf, "navigate target")?;
                if buf.remaining() != 2 {
                    return Err(PixnetError::Protocol(
                        "malformed navigate behavior payload".into(),
                    ));
                }
                let debounce_ms = buf.get_u16_le();
                Ok(Behavior::Navigate {
                    target,
                    debounce_ms,
                })
            }
            2 => {
                let mut buf = data;
                let name = take_short_string(&mut buf, "event name")?;
                if buf.remaining() != 3 {
                    return Err(PixnetError::Protocol(
                        "malformed emit-event behavior payload".into(),
                    ));
                }
                let event_type = buf.get_u8();
                let debounce_ms = buf.get_u16_le();
                Ok(Behavior::EmitEvent {
                    name,
                    event_type,
                    debounce_ms,
                })
            }
            3 => Ok(Behavior::InputZone(data.to_vec())),
            4 => Ok(Behavior::HoverEffect(data.to_vec())),
            5 => Ok(Behavior::ClickEffect(data.to_vec())),
            6 => Ok(Behavior::DragZone(data.to_vec())),
            7 => Ok(Behavior::DropZone(data.to_vec())),
            8 => Ok(Behavior::ScrollZone(data.to_vec())),
            9 => Ok(Behavior::MediaZone(data.to_vec())),
            other => Err(PixnetError::Protocol(format!(
                "unknown behavior id: {other}"
            ))),
        }
    }

    /// Serializes the behavior payload back to its raw form.
    pub fn encode_data(&self) -> Vec<u8> {
        match self {
            Behavior::None => Vec::new(),
            Behavior::Navigate {
                target,
                debounce_ms,
            } => {
                let mut buf = BytesMut::with_capacity(target.len() + 3);
                buf.put_u8(target.len() as u8);
                buf.put_slice(target.as_bytes());
                buf.put_u16_le(*debounce_ms);
                buf.to_vec()
            }
            Behavior::EmitEvent {
                name,
                event_type,
                debounce_ms,
            } => {
                let mut buf = BytesMut::with_capacity(name.len() + 4);
                buf.put_u8(name.len() as u8);
                buf.put_slice(name.as_bytes());
                buf.put_u8(*event_type);
                buf.put_u16_le(*debounce_ms);
                buf.to_vec()
            }
            Behavior::InputZone(data)
            | Behavior::HoverEffect(data)
            | Behavior::ClickEffect(data)
            | Behavior::DragZone(data)
            | Behavior::DropZone(data)
            | Behavior::ScrollZone(data)
            | Behavior::MediaZone(data) => data.clone(),
        }
    }
}

fn take_short_string(buf: &mut &[u8], what: &str) -> Result<String> {
    if buf.remaining() < 1 {
        return Err(PixnetError::Protocol(format!("truncated {what}")));
    }
    let len = buf.get_u8() as usize;
    if buf.remaining() < len {
        return Err(PixnetError::Protocol(format!("truncated {what}")));
    }
    let raw = buf[..len].to_vec();
    buf.advance(len);
    String::from_utf8(raw).map_err(|_| PixnetError::Protocol(format!("{what} is not UTF-8")))
}

/// One interactive zone definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    /// Category id referenced by the category map. 0 is reserved for "no
    /// category" and never appears in the table.
    pub id: u16,
    /// ASCII name, at most 255 bytes.
    pub name: String,
    /// Overlap resolution priority; higher wins in the rendering client.
    pub priority: u8,
    /// Action bound to this zone.
    pub behavior: Behavior,
}

/// One frame of a page's animation track, RGBA8 at page dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationFrame {
    /// RGBA8 pixel plane, same dimensions as the page.
    pub pixels: Vec<u8>,
    /// Display duration in milliseconds. Inheritance from the track's base
    /// delay is resolved at decode time, so this is always explicit.
    pub duration_ms: u32,
}

/// Raw PCM audio attached to a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioStream {
    /// Application-defined format tag.
    pub format: u8,
    /// Samples per second.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u8,
    /// Raw PCM payload.
    pub data: Vec<u8>,
}

/// A fully decoded PXNT page.
///
/// Invariants, established by the codec and preserved by construction:
/// `pixels.len() == width * height * 4`, `category_map.len() == width *
/// height * 2`, and every nonzero id in the map appears exactly once in
/// `categories`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Width in pixels, at least 1.
    pub width: u16,
    /// Height in pixels, at least 1.
    pub height: u16,
    /// Stored pixel format; the in-memory plane is always RGBA8.
    pub pixel_format: PixelFormat,
    /// Plane compression used on disk.
    pub compression: Compression,
    /// Container flag bits (category-map compression plus section presence).
    pub flags: u16,
    /// Creation time, Unix seconds.
    pub created: u32,
    /// Last modification time, Unix seconds.
    pub modified: u32,
    /// Descriptive metadata.
    pub metadata: PageMetadata,
    /// RGBA8 pixel plane, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
    /// Per-pixel category ids, little-endian u16 pairs in container order.
    pub category_map: Vec<u8>,
    /// Category table, ids unique and nonzero.
    pub categories: Vec<Category>,
    /// Animation track; empty when the page is static.
    pub animation: Vec<AnimationFrame>,
    /// Optional audio stream.
    pub audio: Option<AudioStream>,
    /// Extended metadata sections as (type tag, raw bytes), order preserved.
    pub extended_metadata: Vec<(u8, Vec<u8>)>,
}

impl Page {
    /// Category id under the given pixel, or 0 when out of bounds.
    pub fn category_at(&self, x: u16, y: u16) -> u16 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 2;
        u16::from_le_bytes([self.category_map[idx], self.category_map[idx + 1]])
    }

    /// Looks up a category record by id.
    pub fn category(&self, id: u16) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// Checks the structural invariants the codec guarantees.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PixnetError::Protocol("zero page dimension".into()));
        }
        let pixel_len = self.width as usize * self.height as usize * 4;
        if self.pixels.len() != pixel_len {
            return Err(PixnetError::PixelSizeMismatch {
                expected: pixel_len,
                actual: self.pixels.len(),
            });
        }
        let map_len = self.width as usize * self.height as usize * 2;
        if self.category_map.len() != map_len {
            return Err(PixnetError::CategoryMapSizeMismatch {
                expected: map_len,
                actual: self.category_map.len(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for category in &self.categories {
            if category.id == 0 || !seen.insert(category.id) {
                return Err(PixnetError::Protocol(format!(
                    "invalid category id {} in table",
                    category.id
                )));
            }
        }
        for pair in self.category_map.chunks_exact(2) {
            let id = u16::from_le_bytes([pair[0], pair[1]]);
            if id != 0 && !seen.contains(&id) {
                return Err(PixnetError::Protocol(format!(
                    "category map references undefined id {id}"
                )));
            }
        }
        for frame in &self.animation {
            if frame.pixels.len() != pixel_len {
                return Err(PixnetError::PixelSizeMismatch {
                    expected: pixel_len,
                    actual: frame.pixels.len(),
                });
            }
        }
        Ok(())
    }
}

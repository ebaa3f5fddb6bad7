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

//! PXNT container codec.
//!
//! PXNT is the little-endian on-disk format carrying one complete page:
//! a 32-byte header, metadata, the pixel and category planes (optionally
//! zlib-compressed), the category table, optional animation/audio/extension
//! sections, and a trailing footer. The codec is pure over byte slices;
//! [`load`] and [`save`] are thin filesystem wrappers.
//!
//! The header's `file_size` and `crc32` fields are derived during encoding
//! and checked (warn-only, matching the footer policy) during decoding; they
//! are not part of the [`Page`] model, so `decode(encode(page)) == page`
//! holds field-for-field.

use std::path::Path;

use bytes::{BufMut, BytesMut};
use log::warn;

use crate::error::{PixnetError, Result};
use crate::page::{
    AnimationFrame, AudioStream, Behavior, Category, Compression, Page, PageMetadata, PixelFormat,
};
use crate::zlib;

/// File magic opening every PXNT container.
pub const PXNT_MAGIC: &[u8; 4] = b"PXNT";
/// Footer magic (the file magic reversed) closing the container.
pub const FOOTER_MAGIC: &[u8; 4] = b"TNXP";
/// Only container version currently defined.
pub const PXNT_VERSION: u16 = 1;

/// Fixed header length in bytes.
const HEADER_LEN: usize = 32;
/// Footer magic plus 12 reserved bytes.
const FOOTER_LEN: usize = 16;

/// Header flag: category map is zlib-compressed.
pub const FLAG_COMPRESSED_MAP: u16 = 0x01;
/// Header flag: animation section present.
pub const FLAG_HAS_ANIMATION: u16 = 0x02;
/// Header flag: audio section present.
pub const FLAG_HAS_AUDIO: u16 = 0x04;
/// Header flag: extended-metadata section present.
pub const FLAG_HAS_EXTENDED: u16 = 0x08;

const SECTION_FLAGS: u16 = FLAG_HAS_ANIMATION | FLAG_HAS_AUDIO | FLAG_HAS_EXTENDED;

/// Checked little-endian reader over a byte slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(PixnetError::ShortRead {
                needed: n,
                got: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self, len: usize, what: &str) -> Result<String> {
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| PixnetError::Protocol(format!("{what} is not UTF-8")))
    }
}

/// Decodes a PXNT byte stream into a [`Page`].
pub fn decode(data: &[u8]) -> Result<Page> {
    let mut reader = Reader::new(data);

    // File header.
    let magic = reader.take(4)?;
    if magic != PXNT_MAGIC {
        return Err(PixnetError::BadMagic(magic.to_vec()));
    }
    let version = reader.u16()?;
    if version != PXNT_VERSION {
        return Err(PixnetError::UnsupportedVersion(version));
    }
    let raw_flags = reader.u16()?;
    let _file_size = reader.u32()?;
    let created = reader.u32()?;
    let modified = reader.u32()?;
    let stored_crc = reader.u32()?;
    let width = reader.u16()?;
    let height = reader.u16()?;
    let pixel_format = PixelFormat::from_u8(reader.u8()?)?;
    let compression = Compression::from_u8(reader.u8()?)?;
    let _reserved = reader.u16()?;

    if width == 0 || height == 0 {
        return Err(PixnetError::Protocol(format!(
            "invalid page dimensions {width}x{height}"
        )));
    }

    let metadata = decode_metadata(&mut reader)?;
    let pixels = decode_pixels(&mut reader, width, height, pixel_format, compression)?;
    let category_map = decode_category_map(&mut reader, width, height, raw_flags)?;
    let categories = decode_categories(&mut reader)?;

    let mut animation = Vec::new();
    if raw_flags & FLAG_HAS_ANIMATION != 0 {
        animation = decode_animation(&mut reader, width, height, compression)?;
    }
    let mut audio = None;
    if raw_flags & FLAG_HAS_AUDIO != 0 {
        audio = Some(decode_audio(&mut reader)?);
    }
    let mut extended_metadata = Vec::new();
    if raw_flags & FLAG_HAS_EXTENDED != 0 {
        extended_metadata = decode_extended(&mut reader)?;
    }

    let body_end = reader.position();

    // Footer problems do not invalidate the content parsed above.
    match reader.take(FOOTER_LEN) {
        Ok(footer) if &footer[..4] == FOOTER_MAGIC => {}
        Ok(_) => warn!("PXNT footer magic mismatch, keeping decoded content"),
        Err(_) => warn!("PXNT footer missing, keeping decoded content"),
    }

    if stored_crc != 0 {
        let actual = zlib::crc32(&[&data[HEADER_LEN..body_end]]);
        if actual != stored_crc {
            warn!("PXNT body CRC mismatch: header {stored_crc:#010x}, computed {actual:#010x}");
        }
    }

    let mut flags = raw_flags & !SECTION_FLAGS;
    if !animation.is_empty() {
        flags |= FLAG_HAS_ANIMATION;
    }
    if audio.is_some() {
        flags |= FLAG_HAS_AUDIO;
    }
    if !extended_metadata.is_empty() {
        flags |= FLAG_HAS_EXTENDED;
    }

    let page = Page {
        width,
        height,
        pixel_format,
        compression,
        flags,
        created,
        modified,
        metadata,
        pixels,
        category_map,
        categories,
        animation,
        audio,
        extended_metadata,
    };
    page.validate()?;
    Ok(page)
}

fn decode_metadata(reader: &mut Reader<'_>) -> Result<PageMetadata> {
    let title_len = reader.u16()? as usize;
    let title = reader.string(title_len, "title")?;
    let author_len = reader.u8()? as usize;
    let author = reader.string(author_len, "author")?;
    let desc_len = reader.u16()? as usize;
    let description = reader.string(desc_len, "description")?;
    let url_len = reader.u16()? as usize;
    let url = reader.string(url_len, "url")?;

    let keyword_count = reader.u8()?;
    let mut keywords = Vec::with_capacity(keyword_count as usize);
    for _ in 0..keyword_count {
        let len = reader.u8()? as usize;
        keywords.push(reader.string(len, "keyword")?);
    }

    let custom_count = reader.u8()?;
    let mut custom_fields = Vec::with_capacity(custom_count as usize);
    for _ in 0..custom_count {
        let key_len = reader.u8()? as usize;
        let key = reader.string(key_len, "custom field key")?;
        let value_len = reader.u16()? as usize;
        let value = reader.string(value_len, "custom field value")?;
        custom_fields.push((key, value));
    }

    Ok(PageMetadata {
        title,
        author,
        description,
        url,
        keywords,
        custom_fields,
    })
}

fn decode_pixels(
    reader: &mut Reader<'_>,
    width: u16,
    height: u16,
    format: PixelFormat,
    compression: Compression,
) -> Result<Vec<u8>> {
    let expected = width as usize * height as usize * format.bytes_per_pixel();
    let stored = match compression {
        Compression::None => reader.take(expected)?.to_vec(),
        Compression::Zlib => {
            let _uncompressed_size = reader.u32()?;
            let compressed_size = reader.u32()? as usize;
            zlib::decompress(reader.take(compressed_size)?)?
        }
    };
    if stored.len() != expected {
        return Err(PixnetError::PixelSizeMismatch {
            expected,
            actual: stored.len(),
        });
    }
    Ok(materialize_rgba8(&stored, format))
}

/// Converts a stored plane into the in-memory RGBA8 representation.
fn materialize_rgba8(stored: &[u8], format: PixelFormat) -> Vec<u8> {
    match format {
        PixelFormat::Rgba8 => stored.to_vec(),
        PixelFormat::Rgb8 => {
            let mut rgba = Vec::with_capacity(stored.len() / 3 * 4);
            for px in stored.chunks_exact(3) {
                rgba.extend_from_slice(px);
                rgba.push(255);
            }
            rgba
        }
        PixelFormat::Rgba16 => {
            // High byte of each little-endian 16-bit channel.
            let mut rgba = Vec::with_capacity(stored.len() / 2);
            for px in stored.chunks_exact(2) {
                rgba.push(px[1]);
            }
            rgba
        }
    }
}

/// Converts the in-memory RGBA8 plane back to the stored representation.
fn store_plane(rgba: &[u8], format: PixelFormat) -> Vec<u8> {
    match format {
        PixelFormat::Rgba8 => rgba.to_vec(),
        PixelFormat::Rgb8 => {
            let mut out = Vec::with_capacity(rgba.len() / 4 * 3);
            for px in rgba.chunks_exact(4) {
                out.extend_from_slice(&px[..3]);
            }
            out
        }
        PixelFormat::Rgba16 => {
            // Widen by byte replication so narrowing recovers the original.
            let mut out = Vec::with_capacity(rgba.len() * 2);
            for &byte in rgba {
                out.push(byte);
                out.push(byte);
            }
            out
        }
    }
}

fn decode_category_map(
    reader: &mut Reader<'_>,
    width: u16,
    height: u16,
    flags: u16,
) -> Result<Vec<u8>> {
    let expected = width as usize * height as usize * 2;
    let map = if flags & FLAG_COMPRESSED_MAP != 0 {
        let _uncompressed_size = reader.u32()?;
        let compressed_size = reader.u32()? as usize;
        zlib::decompress(reader.take(compressed_size)?)?
    } else {
        reader.take(expected)?.to_vec()
    };
    if map.len() != expected {
        return Err(PixnetError::CategoryMapSizeMismatch {
            expected,
            actual: map.len(),
        });
    }
    Ok(map)
}

fn decode_categories(reader: &mut Reader<'_>) -> Result<Vec<Category>> {
    let count = reader.u16()?;
    let mut categories = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = reader.u16()?;
        let behavior_id = reader.u8()?;
        let priority = reader.u8()?;
        let name_len = reader.u16()? as usize;
        let data_len = reader.u16()? as usize;
        if name_len > 255 {
            return Err(PixnetError::Protocol(format!(
                "category name too long: {name_len} bytes"
            )));
        }
        let name = reader.string(name_len, "category name")?;
        let behavior = Behavior::parse(behavior_id, reader.take(data_len)?)?;
        categories.push(Category {
            id,
            name,
            priority,
            behavior,
        });
    }
    Ok(categories)
}

fn decode_animation(
    reader: &mut Reader<'_>,
    width: u16,
    height: u16,
    compression: Compression,
) -> Result<Vec<AnimationFrame>> {
    let frame_count = reader.u32()?;
    let base_delay = reader.u32()?;
    let expected = width as usize * height as usize * 4;
    let mut frames = Vec::new();
    for _ in 0..frame_count {
        let duration = reader.u32()?;
        let size = reader.u32()? as usize;
        let raw = reader.take(size)?;
        let pixels = match compression {
            Compression::None => raw.to_vec(),
            Compression::Zlib => zlib::decompress(raw)?,
        };
        if pixels.len() != expected {
            return Err(PixnetError::PixelSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        frames.push(AnimationFrame {
            pixels,
            duration_ms: if duration > 0 { duration } else { base_delay },
        });
    }
    Ok(frames)
}

fn decode_audio(reader: &mut Reader<'_>) -> Result<AudioStream> {
    let format = reader.u8()?;
    let sample_rate = reader.u32()?;
    let channels = reader.u8()?;
    let data_size = reader.u32()? as usize;
    let data = reader.take(data_size)?.to_vec();
    Ok(AudioStream {
        format,
        sample_rate,
        channels,
        data,
    })
}

fn decode_extended(reader: &mut Reader<'_>) -> Result<Vec<(u8, Vec<u8>)>> {
    let section_count = reader.u16()?;
    let mut sections = Vec::with_capacity(section_count as usize);
    for _ in 0..section_count {
        let section_type = reader.u8()?;
        let size = reader.u32()? as usize;
        sections.push((section_type, reader.take(size)?.to_vec()));
    }
    Ok(sections)
}

/// Encodes a [`Page`] into PXNT container bytes.
///
/// `file_size` and the body CRC32 are patched into the header after the body
/// is assembled.
pub fn encode(page: &Page) -> Result<Vec<u8>> {
    page.validate()?;
    check_metadata_limits(&page.metadata)?;

    let mut flags = page.flags & !SECTION_FLAGS;
    if !page.animation.is_empty() {
        flags |= FLAG_HAS_ANIMATION;
    }
    if page.audio.is_some() {
        flags |= FLAG_HAS_AUDIO;
    }
    if !page.extended_metadata.is_empty() {
        flags |= FLAG_HAS_EXTENDED;
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + page.pixels.len() + page.category_map.len());

    // Header with file_size/crc32 placeholders.
    buf.put_slice(PXNT_MAGIC);
    buf.put_u16_le(PXNT_VERSION);
    buf.put_u16_le(flags);
    buf.put_u32_le(0); // file_size, patched below
    buf.put_u32_le(page.created);
    buf.put_u32_le(page.modified);
    buf.put_u32_le(0); // crc32, patched below
    buf.put_u16_le(page.width);
    buf.put_u16_le(page.height);
    buf.put_u8(page.pixel_format.as_u8());
    buf.put_u8(page.compression.as_u8());
    buf.put_u16_le(0); // reserved

    encode_metadata(&mut buf, &page.metadata);

    let stored = store_plane(&page.pixels, page.pixel_format);
    match page.compression {
        Compression::None => buf.put_slice(&stored),
        Compression::Zlib => {
            let compressed = zlib::compress(&stored);
            buf.put_u32_le(stored.len() as u32);
            buf.put_u32_le(compressed.len() as u32);
            buf.put_slice(&compressed);
        }
    }

    if flags & FLAG_COMPRESSED_MAP != 0 {
        let compressed = zlib::compress(&page.category_map);
        buf.put_u32_le(page.category_map.len() as u32);
        buf.put_u32_le(compressed.len() as u32);
        buf.put_slice(&compressed);
    } else {
        buf.put_slice(&page.category_map);
    }

    if page.categories.len() > u16::MAX as usize {
        return Err(PixnetError::Protocol(format!(
            "too many categories: {}",
            page.categories.len()
        )));
    }
    buf.put_u16_le(page.categories.len() as u16);
    for category in &page.categories {
        if category.name.len() > 255 {
            return Err(PixnetError::Protocol(format!(
                "category name too long: {} bytes",
                category.name.len()
            )));
        }
        let data = category.behavior.encode_data();
        if data.len() > u16::MAX as usize {
            return Err(PixnetError::Protocol(format!(
                "behavior data too long: {} bytes",
                data.len()
            )));
        }
        buf.put_u16_le(category.id);
        buf.put_u8(category.behavior.id());
        buf.put_u8(category.priority);
        buf.put_u16_le(category.name.len() as u16);
        buf.put_u16_le(data.len() as u16);
        buf.put_slice(category.name.as_bytes());
        buf.put_slice(&data);
    }

    if flags & FLAG_HAS_ANIMATION != 0 {
        buf.put_u32_le(page.animation.len() as u32);
        buf.put_u32_le(0); // base delay; decoded durations are always explicit
        for frame in &page.animation {
            buf.put_u32_le(frame.duration_ms);
            match page.compression {
                Compression::None => {
                    buf.put_u32_le(frame.pixels.len() as u32);
                    buf.put_slice(&frame.pixels);
                }
                Compression::Zlib => {
                    let compressed = zlib::compress(&frame.pixels);
                    buf.put_u32_le(compressed.len() as u32);
                    buf.put_slice(&compressed);
                }
            }
        }
    }

    if let Some(audio) = &page.audio {
        buf.put_u8(audio.format);
        buf.put_u32_le(audio.sample_rate);
        buf.put_u8(audio.channels);
        buf.put_u32_le(audio.data.len() as u32);
        buf.put_slice(&audio.data);
    }

    if flags & FLAG_HAS_EXTENDED != 0 {
        buf.put_u16_le(page.extended_metadata.len() as u16);
        for (section_type, data) in &page.extended_metadata {
            buf.put_u8(*section_type);
            buf.put_u32_le(data.len() as u32);
            buf.put_slice(data);
        }
    }

    let mut out = buf.to_vec();
    let body_len = out.len() as u32;
    out[8..12].copy_from_slice(&body_len.to_le_bytes());
    let crc = zlib::crc32(&[&out[HEADER_LEN..]]);
    out[20..24].copy_from_slice(&crc.to_le_bytes());

    out.extend_from_slice(FOOTER_MAGIC);
    out.extend_from_slice(&[0u8; 12]);
    Ok(out)
}

fn encode_metadata(buf: &mut BytesMut, metadata: &PageMetadata) {
    buf.put_u16_le(metadata.title.len() as u16);
    buf.put_slice(metadata.title.as_bytes());
    buf.put_u8(metadata.author.len() as u8);
    buf.put_slice(metadata.author.as_bytes());
    buf.put_u16_le(metadata.description.len() as u16);
    buf.put_slice(metadata.description.as_bytes());
    buf.put_u16_le(metadata.url.len() as u16);
    buf.put_slice(metadata.url.as_bytes());
    buf.put_u8(metadata.keywords.len() as u8);
    for keyword in &metadata.keywords {
        buf.put_u8(keyword.len() as u8);
        buf.put_slice(keyword.as_bytes());
    }
    buf.put_u8(metadata.custom_fields.len() as u8);
    for (key, value) in &metadata.custom_fields {
        buf.put_u8(key.len() as u8);
        buf.put_slice(key.as_bytes());
        buf.put_u16_le(value.len() as u16);
        buf.put_slice(value.as_bytes());
    }
}

fn check_metadata_limits(metadata: &PageMetadata) -> Result<()> {
    let over = |what: &str, len: usize, max: usize| {
        Err(PixnetError::Protocol(format!(
            "{what} too long: {len} bytes (max {max})"
        )))
    };
    if metadata.title.len() > u16::MAX as usize {
        return over("title", metadata.title.len(), u16::MAX as usize);
    }
    if metadata.author.len() > u8::MAX as usize {
        return over("author", metadata.author.len(), u8::MAX as usize);
    }
    if metadata.description.len() > u16::MAX as usize {
        return over("description", metadata.description.len(), u16::MAX as usize);
    }
    if metadata.url.len() > u16::MAX as usize {
        return over("url", metadata.url.len(), u16::MAX as usize);
    }
    if metadata.keywords.len() > u8::MAX as usize {
        return over("keyword list", metadata.keywords.len(), u8::MAX as usize);
    }
    for keyword in &metadata.keywords {
        if keyword.len() > u8::MAX as usize {
            return over("keyword", keyword.len(), u8::MAX as usize);
        }
    }
    if metadata.custom_fields.len() > u8::MAX as usize {
        return over(
            "custom field map",
            metadata.custom_fields.len(),
            u8::MAX as usize,
        );
    }
    for (key, value) in &metadata.custom_fields {
        if key.len() > u8::MAX as usize {
            return over("custom field key", key.len(), u8::MAX as usize);
        }
        if value.len() > u16::MAX as usize {
            return over("custom field value", value.len(), u16::MAX as usize);
        }
    }
    Ok(())
}

/// Loads and decodes a `.pxnt` file.
pub fn load(path: &Path) -> Result<Page> {
    let data = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PixnetError::FileNotFound(path.display().to_string())
        } else {
            PixnetError::Io(e)
        }
    })?;
    decode(&data)
}

/// Encodes and writes a page to a `.pxnt` file.
pub fn save(path: &Path, page: &Page) -> Result<()> {
    let data = encode(page)?;
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_page() -> Page {
        // 2x2 page: pixel (1, 0) belongs to category 1, (0, 1) to category 2.
        let mut category_map = vec![0u8; 2 * 2 * 2];
        category_map[2..4].copy_from_slice(&1u16.to_le_bytes());
        category_map[4..6].copy_from_slice(&2u16.to_le_bytes());
        Page {
            width: 2,
            height: 2,
            pixel_format: PixelFormat::Rgba8,
            compression: Compression::None,
            flags: 0,
            created: 1_700_000_000,
            modified: 1_700_000_100,
            metadata: PageMetadata {
                title: "Test Page".into(),
                author: "tester".into(),
                description: "a tiny page".into(),
                url: "pixnet://test".into(),
                keywords: vec!["tiny".into(), "fixture".into()],
                custom_fields: vec![("lang".into(), "en".into())],
            },
            pixels: (0..16u8).collect(),
            category_map,
            categories: vec![
                Category {
                    id: 1,
                    name: "home_button".into(),
                    priority: 128,
                    behavior: Behavior::Navigate {
                        target: "home".into(),
                        debounce_ms: 100,
                    },
                },
                Category {
                    id: 2,
                    name: "decoration".into(),
                    priority: 10,
                    behavior: Behavior::None,
                },
            ],
            animation: Vec::new(),
            audio: None,
            extended_metadata: Vec::new(),
        }
    }

    fn noisy_pixels(width: usize, height: usize) -> Vec<u8> {
        (0..width * height * 4)
            .map(|i| (i * 31 % 253) as u8)
            .collect()
    }

    #[test]
    fn round_trip_uncompressed() {
        let page = small_page();
        let bytes = encode(&page).unwrap();
        assert_eq!(&bytes[..4], PXNT_MAGIC);
        assert_eq!(&bytes[bytes.len() - FOOTER_LEN..][..4], FOOTER_MAGIC);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, page);
    }

    #[test]
    fn file_size_field_covers_body() {
        let bytes = encode(&small_page()).unwrap();
        let file_size = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        assert_eq!(file_size, bytes.len() - FOOTER_LEN);
    }

    #[test]
    fn round_trip_compressed() {
        let mut page = small_page();
        page.width = 64;
        page.height = 64;
        page.compression = Compression::Zlib;
        page.flags = FLAG_COMPRESSED_MAP;
        page.pixels = noisy_pixels(64, 64);
        page.category_map = vec![0u8; 64 * 64 * 2];
        page.categories.clear();

        let bytes = encode(&page).unwrap();
        assert!(bytes.len() < 64 * 64 * 6); // the planes actually compressed
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, page);
    }

    #[test]
    fn corrupt_compressed_stream_fails() {
        let mut page = small_page();
        page.width = 64;
        page.height = 64;
        page.compression = Compression::Zlib;
        page.pixels = noisy_pixels(64, 64);
        page.category_map = vec![0u8; 64 * 64 * 2];
        page.categories.clear();

        let mut bytes = encode(&page).unwrap();
        // Locate the compressed pixel block: header, metadata, then the
        // (uncompressed_size, compressed_size) framing.
        let mut reader = Reader::new(&bytes);
        reader.take(HEADER_LEN).unwrap();
        decode_metadata(&mut reader).unwrap();
        let pixel_data_start = reader.position() + 8;
        bytes[pixel_data_start + 10] ^= 0xFF;

        assert!(matches!(
            decode(&bytes),
            Err(PixnetError::Decompression(_))
        ));
    }

    #[test]
    fn rgb8_inflates_to_rgba8() {
        let mut page = small_page();
        page.pixel_format = PixelFormat::Rgb8;
        // Alpha must be 255 for an Rgb8 page to survive the round trip.
        for px in page.pixels.chunks_exact_mut(4) {
            px[3] = 255;
        }
        let bytes = encode(&page).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.pixels.len(), 2 * 2 * 4);
        assert_eq!(decoded, page);
    }

    #[test]
    fn rgba16_narrows_to_rgba8() {
        let mut page = small_page();
        page.pixel_format = PixelFormat::Rgba16;
        let bytes = encode(&page).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.pixels.len(), 2 * 2 * 4);
        assert_eq!(decoded, page);
    }

    #[test]
    fn optional_sections_round_trip() {
        let mut page = small_page();
        page.animation = vec![
            AnimationFrame {
                pixels: vec![7u8; 16],
                duration_ms: 40,
            },
            AnimationFrame {
                pixels: vec![9u8; 16],
                duration_ms: 80,
            },
        ];
        page.audio = Some(AudioStream {
            format: 1,
            sample_rate: 44_100,
            channels: 2,
            data: vec![0, 1, 2, 3, 4, 5],
        });
        page.extended_metadata = vec![(0x10, vec![0xDE, 0xAD]), (0x20, Vec::new())];

        let bytes = encode(&page).unwrap();
        let decoded = decode(&bytes).unwrap();
        // Section flags are derived from content.
        assert_eq!(
            decoded.flags,
            FLAG_HAS_ANIMATION | FLAG_HAS_AUDIO | FLAG_HAS_EXTENDED
        );
        assert_eq!(decoded.animation, page.animation);
        assert_eq!(decoded.audio, page.audio);
        assert_eq!(decoded.extended_metadata, page.extended_metadata);
    }

    #[test]
    fn zero_frame_duration_inherits_base_delay() {
        let mut page = small_page();
        page.animation = vec![AnimationFrame {
            pixels: vec![1u8; 16],
            duration_ms: 0,
        }];
        let mut bytes = encode(&page).unwrap();
        // Patch the base delay in the encoded animation section; the frame's
        // own duration is zero so it inherits.
        let mut reader = Reader::new(&bytes);
        reader.take(HEADER_LEN).unwrap();
        decode_metadata(&mut reader).unwrap();
        reader.take(2 * 2 * 4).unwrap(); // pixels
        reader.take(2 * 2 * 2).unwrap(); // category map
        decode_categories(&mut reader).unwrap();
        let base_delay_at = reader.position() + 4;
        bytes[base_delay_at..base_delay_at + 4].copy_from_slice(&33u32.to_le_bytes());

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.animation[0].duration_ms, 33);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = encode(&small_page()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(PixnetError::BadMagic(_))));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut bytes = encode(&small_page()).unwrap();
        bytes[4..6].copy_from_slice(&9u16.to_le_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(PixnetError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn truncated_file_is_short_read() {
        let bytes = encode(&small_page()).unwrap();
        let cut = &bytes[..HEADER_LEN + 4];
        assert!(matches!(
            decode(cut),
            Err(PixnetError::ShortRead { .. })
        ));
    }

    #[test]
    fn missing_footer_is_tolerated() {
        let page = small_page();
        let bytes = encode(&page).unwrap();
        let decoded = decode(&bytes[..bytes.len() - FOOTER_LEN]).unwrap();
        assert_eq!(decoded, page);
    }

    #[test]
    fn map_reference_to_undefined_category_fails() {
        let mut page = small_page();
        page.categories.pop(); // drop category 2, still referenced by the map
        let err = Page::validate(&page).unwrap_err();
        assert!(matches!(err, PixnetError::Protocol(_)));
    }

    #[test]
    fn load_missing_file_is_file_not_found() {
        let err = load(Path::new("/nonexistent/zzz.pxnt")).unwrap_err();
        assert!(matches!(err, PixnetError::FileNotFound(_)));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.pxnt");
        let page = small_page();
        save(&path, &page).unwrap();
        assert_eq!(load(&path).unwrap(), page);
    }
}

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

//! Zlib plane compression and CRC32 helpers.
//!
//! Both the PXNT container and the wire protocol compress whole planes as
//! independent zlib streams, one per plane; there is no cross-message
//! compressor state.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Crc};

use crate::error::{PixnetError, Result};

/// Compresses a plane as a self-contained zlib stream.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::default());
    // Writing into a Vec cannot fail.
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

/// Inflates a zlib stream, failing with [`PixnetError::Decompression`] on any
/// corruption.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| PixnetError::Decompression(e.to_string()))?;
    Ok(out)
}

/// CRC32 over one or more byte slices, in order.
pub fn crc32(parts: &[&[u8]]) -> u32 {
    let mut crc = Crc::new();
    for part in parts {
        crc.update(part);
    }
    crc.sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let packed = compress(&data);
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn corruption_is_rejected() {
        let mut packed = compress(b"some reasonably compressible payload payload payload");
        let mid = packed.len() / 2;
        packed[mid] ^= 0xFF;
        assert!(matches!(
            decompress(&packed),
            Err(PixnetError::Decompression(_))
        ));
    }

    #[test]
    fn crc_is_order_sensitive() {
        assert_ne!(crc32(&[b"ab", b"cd"]), crc32(&[b"cd", b"ab"]));
        assert_eq!(crc32(&[b"ab", b"cd"]), crc32(&[b"abcd"]));
    }
}

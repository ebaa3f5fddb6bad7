//! Error types for the PIXNET library.

use std::io;
use thiserror::Error;

/// Result type for PIXNET operations.
pub type Result<T> = std::result::Result<T, PixnetError>;

/// Errors that can occur in PIXNET codec, transport and protocol operations.
#[derive(Debug, Error)]
pub enum PixnetError {
    /// A container or wire magic did not match any known value.
    #[error("bad magic: {0:?}")]
    BadMagic(Vec<u8>),

    /// The peer or file declared a protocol/container version we do not speak.
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// The stream ended after delivering only part of an expected read.
    #[error("short read: needed {needed} bytes, got {got}")]
    ShortRead {
        /// Bytes the caller asked for.
        needed: usize,
        /// Bytes actually delivered before the stream ended.
        got: usize,
    },

    /// A per-call read or write deadline elapsed.
    #[error("operation timed out")]
    Timeout,

    /// The peer closed the connection cleanly before any data arrived.
    #[error("connection closed")]
    Closed,

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A zlib stream failed to inflate.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// A pixel plane did not match the dimensions declared in its header.
    #[error("pixel size mismatch: expected {expected} bytes, got {actual}")]
    PixelSizeMismatch {
        /// Byte length implied by width, height and pixel format.
        expected: usize,
        /// Byte length actually present after any decompression.
        actual: usize,
    },

    /// A frame checksum did not match the received payload.
    #[error("checksum error: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumError {
        /// Checksum carried in the frame header.
        expected: u32,
        /// Checksum computed over the received payload.
        actual: u32,
    },

    /// A category map did not match the dimensions declared in its header.
    #[error("category map size mismatch: expected {expected} bytes, got {actual}")]
    CategoryMapSizeMismatch {
        /// Byte length implied by width and height.
        expected: usize,
        /// Byte length actually present.
        actual: usize,
    },

    /// A message carried a session token that does not match any live session.
    #[error("invalid session")]
    InvalidSession,

    /// PIXNET protocol violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A requested page does not exist in the content registry.
    #[error("page not found: {0}")]
    FileNotFound(String),

    /// Internal server failure surfaced to the peer.
    #[error("server error: {0}")]
    Server(String),
}

impl PixnetError {
    /// Maps this error to the wire error code carried in a `PIXERR` message.
    ///
    /// Transport and codec failures all collapse to `PROTOCOL_ERROR`; the
    /// protocol-semantic kinds keep their dedicated codes.
    pub fn wire_code(&self) -> u16 {
        match self {
            PixnetError::UnsupportedVersion(_) => crate::protocol::ERR_UNSUPPORTED_VERSION,
            PixnetError::InvalidSession => crate::protocol::ERR_INVALID_SESSION,
            PixnetError::FileNotFound(_) => crate::protocol::ERR_FILE_NOT_FOUND,
            PixnetError::Server(_) => crate::protocol::ERR_SERVER_ERROR,
            _ => crate::protocol::ERR_PROTOCOL_ERROR,
        }
    }
}

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

//! Exact-size byte I/O over an ordered stream.
//!
//! TCP delivers an ordered byte stream but fragments reads arbitrarily, so
//! every fixed-shape protocol read loops until the requested count has
//! accumulated. This module owns that loop and turns its failure modes into
//! typed errors ([`PixnetError::Closed`], [`PixnetError::ShortRead`],
//! [`PixnetError::Timeout`]) so the codecs above it never touch a socket
//! directly.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time;

use crate::error::{PixnetError, Result};

/// Deadline applied to every read during the connection handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-read deadline once a session is established.
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Reads exactly `n` bytes, failing with [`PixnetError::Timeout`] if the
/// deadline elapses first.
///
/// A clean close before the first byte maps to [`PixnetError::Closed`]; a
/// close partway through maps to [`PixnetError::ShortRead`].
pub async fn read_exact<R>(reader: &mut R, n: usize, deadline: Duration) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    match time::timeout(deadline, fill_exact(reader, n)).await {
        Ok(result) => result,
        Err(_) => Err(PixnetError::Timeout),
    }
}

async fn fill_exact<R>(reader: &mut R, n: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; n];
    let mut filled = 0;
    while filled < n {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            return Err(if filled == 0 {
                PixnetError::Closed
            } else {
                PixnetError::ShortRead {
                    needed: n,
                    got: filled,
                }
            });
        }
        filled += read;
    }
    Ok(buf)
}

/// Writes the full buffer or fails.
pub async fn write_all<W>(writer: &mut W, buf: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read-side wrapper that adds every delivered byte to a shared counter.
pub struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R> CountingReader<R> {
    /// Wraps `inner`, accumulating into `count`.
    pub fn new(inner: R, count: Arc<AtomicU64>) -> Self {
        Self { inner, count }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let delta = (buf.filled().len() - before) as u64;
            self.count.fetch_add(delta, Ordering::Relaxed);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_across_fragments() {
        let (mut tx, mut rx) = tokio::io::duplex(4);

        let writer = tokio::spawn(async move {
            write_all(&mut tx, b"hello world").await.unwrap();
        });

        let data = read_exact(&mut rx, 11, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&data, b"hello world");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn clean_close_is_closed() {
        let (tx, mut rx) = tokio::io::duplex(16);
        drop(tx);

        let err = read_exact(&mut rx, 4, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, PixnetError::Closed));
    }

    #[tokio::test]
    async fn partial_close_is_short_read() {
        let (mut tx, mut rx) = tokio::io::duplex(16);
        write_all(&mut tx, b"ab").await.unwrap();
        drop(tx);

        let err = read_exact(&mut rx, 4, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, PixnetError::ShortRead { needed: 4, got: 2 }));
    }

    #[tokio::test]
    async fn counting_reader_tracks_bytes() {
        let (mut tx, rx) = tokio::io::duplex(16);
        let count = Arc::new(AtomicU64::new(0));
        let mut rx = CountingReader::new(rx, count.clone());

        write_all(&mut tx, b"12345678").await.unwrap();
        read_exact(&mut rx, 8, Duration::from_secs(1)).await.unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 8);
    }

    #[tokio::test]
    async fn stalled_stream_times_out() {
        let (_tx, mut rx) = tokio::io::duplex(16);

        let err = read_exact(&mut rx, 4, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, PixnetError::Timeout));
    }
}

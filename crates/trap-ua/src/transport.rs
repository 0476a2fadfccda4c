// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Byte-stream transport for complete frames.
//!
//! The engine only ever hands whole frames to the transport and expects whole
//! frames back. [`StreamTransport`] does the framing over any
//! `AsyncRead`/`AsyncWrite` pair by reading the fixed 8-byte header first and
//! then the remaining `size - 8` bytes.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = StreamTransport::connect_tcp("plc:4840", Duration::from_secs(5)).await?;
//! transport.send(&frame.encode()).await?;
//! let reply = transport.receive().await?;
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::trace;

use crate::error::{ConnectionError, EncodingError, UaResult};
use crate::messages::frame::{parse_frame_header, FRAME_HEADER_SIZE};

// =============================================================================
// UaTransport
// =============================================================================

/// Frame-oriented transport used by a connection.
#[async_trait]
pub trait UaTransport: Send + Sync {
    /// Writes one complete frame.
    async fn send(&self, frame: &[u8]) -> UaResult<()>;

    /// Reads one complete frame. `Ok(None)` on orderly end of stream.
    async fn receive(&self) -> UaResult<Option<Vec<u8>>>;

    /// Shuts the write side down.
    async fn close(&self) -> UaResult<()>;

    /// Human-readable peer description for logs.
    fn peer(&self) -> String;
}

// =============================================================================
// StreamTransport
// =============================================================================

/// [`UaTransport`] over split stream halves.
pub struct StreamTransport<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
    peer: String,
    max_frame_size: usize,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Wraps a reader/writer pair.
    pub fn new(reader: R, writer: W, peer: impl Into<String>) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            peer: peer.into(),
            max_frame_size: usize::MAX,
        }
    }

    /// Rejects inbound frames larger than `max` bytes.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }
}

impl StreamTransport<OwnedReadHalf, OwnedWriteHalf> {
    /// Opens a TCP connection to `host:port` within `connect_timeout`.
    pub async fn connect_tcp(address: &str, connect_timeout: Duration) -> UaResult<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ConnectionError::timed_out(address, connect_timeout))?
            .map_err(|e| ConnectionError::refused_with(address, e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ConnectionError::io("set_nodelay", e))?;
        let (reader, writer) = stream.into_split();
        Ok(Self::new(reader, writer, address))
    }
}

#[async_trait]
impl<R, W> UaTransport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, frame: &[u8]) -> UaResult<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await.map_err(ConnectionError::from)?;
        writer.flush().await.map_err(ConnectionError::from)?;
        trace!(peer = %self.peer, bytes = frame.len(), "Frame sent");
        Ok(())
    }

    async fn receive(&self) -> UaResult<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;

        let mut header = [0u8; FRAME_HEADER_SIZE];
        let mut filled = 0;
        while filled < FRAME_HEADER_SIZE {
            let n = reader
                .read(&mut header[filled..])
                .await
                .map_err(ConnectionError::from)?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(ConnectionError::closed("stream ended inside a frame header").into());
            }
            filled += n;
        }

        let (_, size) = parse_frame_header(&header)?;
        if size > self.max_frame_size {
            return Err(EncodingError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            }
            .into());
        }

        let mut frame = vec![0u8; size];
        frame[..FRAME_HEADER_SIZE].copy_from_slice(&header);
        reader
            .read_exact(&mut frame[FRAME_HEADER_SIZE..])
            .await
            .map_err(ConnectionError::from)?;
        trace!(peer = %self.peer, bytes = size, "Frame received");
        Ok(Some(frame))
    }

    async fn close(&self) -> UaResult<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await.map_err(ConnectionError::from)?;
        Ok(())
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

impl<R, W> fmt::Debug for StreamTransport<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTransport")
            .field("peer", &self.peer)
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ErrorMessage, Frame};
    use crate::types::StatusCode;

    #[tokio::test]
    async fn test_frames_cross_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(1024);
        let (cr, cw) = tokio::io::split(client);
        let (sr, sw) = tokio::io::split(server);
        let client = StreamTransport::new(cr, cw, "client");
        let server = StreamTransport::new(sr, sw, "server");

        let frame = Frame::Error(ErrorMessage {
            error: StatusCode::BAD_TIMEOUT,
            reason: Some("slow".into()),
        })
        .encode();
        client.send(&frame).await.unwrap();
        client.send(&frame).await.unwrap();

        assert_eq!(server.receive().await.unwrap().unwrap(), frame);
        assert_eq!(server.receive().await.unwrap().unwrap(), frame);

        client.close().await.unwrap();
        assert!(server.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (client, server) = tokio::io::duplex(1024);
        let (_, cw) = tokio::io::split(client);
        let (sr, sw) = tokio::io::split(server);
        let server = StreamTransport::new(sr, sw, "server").with_max_frame_size(16);

        let mut writer = cw;
        let frame = Frame::Error(ErrorMessage {
            error: StatusCode::BAD_TIMEOUT,
            reason: Some("a reason longer than the limit".into()),
        })
        .encode();
        writer.write_all(&frame).await.unwrap();

        assert!(server.receive().await.is_err());
    }
}

// Copyright 2025 jonefeewang@gmail.com
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

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;
use tokio::time;
use tracing::trace;

use super::frame::{Frame, MAX_FRAME_LEN};
use crate::message::{Framing, MessageType};
use crate::{AppError, AppResult};

/// One end of a single request/response exchange.
///
/// Owns the stream for its whole lifetime. Reads accumulate in `buffer`
/// until a complete frame is available; writes go through a `BufWriter` and
/// are flushed once per message. Never shared between tasks.
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    reader: ReadHalf<S>,
    writer: BufWriter<WriteHalf<S>>,
    buffer: BytesMut,
    peer: String,
    max_frame_len: usize,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl Connection<TcpStream> {
    /// Wraps an accepted or connected socket, labelled with its peer address.
    pub fn from_tcp(socket: TcpStream) -> Connection<TcpStream> {
        let peer = socket
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "<unknown peer>".to_string());
        Connection::new(socket, peer)
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, peer: impl Into<String>) -> Connection<S> {
        let (reader, writer) = tokio::io::split(stream);
        Connection {
            reader,
            writer: BufWriter::new(writer),
            buffer: BytesMut::with_capacity(4 * 1024),
            peer: peer.into(),
            max_frame_len: MAX_FRAME_LEN,
            read_timeout: None,
            write_timeout: None,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len.min(MAX_FRAME_LEN);
        self
    }

    /// Deadline for every single read; `None` waits forever.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Deadline for every single write; `None` waits forever.
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send<M: MessageType>(
        &mut self,
        message_type: &M,
        value: &M::Value,
    ) -> AppResult<()> {
        let payload = message_type.encode(value)?;
        match message_type.framing() {
            Framing::LengthPrefixed => self.write_frame(&payload).await,
            Framing::Raw { .. } => self.write_raw(&payload).await,
        }
    }

    /// Receives one message; a peer that closed cleanly is `ConnectionClosed`.
    pub async fn recv<M: MessageType>(&mut self, message_type: &M) -> AppResult<M::Value> {
        self.try_recv(message_type)
            .await?
            .ok_or(AppError::ConnectionClosed)
    }

    /// Receives one message, `None` when the peer closed before sending
    /// anything.
    pub async fn try_recv<M: MessageType>(
        &mut self,
        message_type: &M,
    ) -> AppResult<Option<M::Value>> {
        let payload = match message_type.framing() {
            Framing::LengthPrefixed => self.read_frame().await?,
            Framing::Raw { max_bytes } => Some(self.read_raw(max_bytes).await?),
        };
        payload.map(|payload| message_type.decode(payload)).transpose()
    }

    /// Reads one frame.
    ///
    /// Returns `None` if the peer closed the connection before sending any
    /// header byte. A stream that ends inside a header is `InvalidHeader`,
    /// one that ends inside the payload is `TruncatedMessage`.
    pub async fn read_frame(&mut self) -> AppResult<Option<Bytes>> {
        loop {
            if let Some(frame) = Frame::parse(&mut self.buffer, self.max_frame_len)? {
                trace!(peer = %self.peer, len = frame.payload.len(), "frame received");
                return Ok(Some(frame.payload));
            }
            if 0 == self.fill_buffer().await? {
                return Ok(Frame::at_eof(&mut self.buffer, self.max_frame_len)?
                    .map(|frame| frame.payload));
            }
        }
    }

    /// Reads unframed bytes until the peer closes or `max_bytes` arrived.
    ///
    /// Without `max_bytes` the frame limit bounds the read: a peer that sends
    /// more than that before closing is an error.
    pub async fn read_raw(&mut self, max_bytes: Option<usize>) -> AppResult<Bytes> {
        loop {
            match max_bytes {
                Some(max) if self.buffer.len() >= max => {
                    return Ok(self.buffer.split_to(max).freeze());
                }
                None if self.buffer.len() > self.max_frame_len => {
                    return Err(AppError::InvalidValue(format!(
                        "unframed message from {} exceeds {} bytes",
                        self.peer, self.max_frame_len
                    )));
                }
                _ => {}
            }
            if 0 == self.fill_buffer().await? {
                return Ok(self.buffer.split().freeze());
            }
        }
    }

    /// Writes header and payload as one buffered write, then flushes.
    pub async fn write_frame(&mut self, payload: &[u8]) -> AppResult<()> {
        let mut frame = BytesMut::new();
        Frame::encode(payload, &mut frame)?;
        self.write_raw(&frame).await
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) -> AppResult<()> {
        let writer = &mut self.writer;
        with_deadline(self.write_timeout, "writing", &self.peer, async move {
            writer.write_all(bytes).await?;
            writer.flush().await
        })
        .await
    }

    /// Flushes pending output and shuts down the write direction, so the
    /// peer reads a clean end of stream instead of a reset. The stream is
    /// released when the connection is dropped.
    pub async fn close(mut self) -> AppResult<()> {
        let writer = &mut self.writer;
        with_deadline(self.write_timeout, "closing", &self.peer, writer.shutdown()).await?;
        trace!(peer = %self.peer, "connection closed");
        Ok(())
    }

    async fn fill_buffer(&mut self) -> AppResult<usize> {
        let reader = &mut self.reader;
        let buffer = &mut self.buffer;
        with_deadline(self.read_timeout, "reading", &self.peer, reader.read_buf(buffer)).await
    }
}

async fn with_deadline<T, F>(
    deadline: Option<Duration>,
    operation: &'static str,
    peer: &str,
    future: F,
) -> AppResult<T>
where
    F: Future<Output = io::Result<T>>,
{
    let result = match deadline {
        Some(after) => time::timeout(after, future)
            .await
            .map_err(|_| AppError::Timeout {
                operation,
                peer: peer.to_string(),
                after,
            })?,
        None => future.await,
    };
    result.map_err(|e| AppError::transport(peer, e))
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use tokio::io::duplex;

    use super::*;
    use crate::message::{Framed, Json, RawBytes};

    #[tokio::test]
    async fn test_send_recv_over_duplex() {
        let (left, right) = duplex(64);
        let mut client = Connection::new(left, "client");
        let mut server = Connection::new(right, "server");

        let value = serde_json::json!({"x": 1, "list": [1, 2, 3]});
        let sender = tokio::spawn(async move {
            client.send(&Json::<serde_json::Value>::new(), &value).await.unwrap();
            client.close().await.unwrap();
        });

        let received = server.recv(&Json::<serde_json::Value>::new()).await.unwrap();
        assert_eq!(received, serde_json::json!({"x": 1, "list": [1, 2, 3]}));
        assert!(server.try_recv(&Framed).await.unwrap().is_none());
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn test_large_frame_over_small_pipe() {
        let (left, right) = duplex(16);
        let payload = Bytes::from((0..200_000u32).map(|v| v as u8).collect::<Vec<_>>());
        let expected = payload.clone();
        let sender = tokio::spawn(async move {
            let mut client = Connection::new(left, "client");
            client.send(&Framed, &payload).await.unwrap();
            client.close().await.unwrap();
        });
        let mut server = Connection::new(right, "server");
        assert_eq!(server.recv(&Framed).await.unwrap(), expected);
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_payload() {
        let (mut left, right) = duplex(64);
        let mut raw = BytesMut::new();
        raw.put_u32(100);
        raw.put_slice(b"only a few bytes");
        left.write_all(&raw).await.unwrap();
        drop(left);

        let mut server = Connection::new(right, "server");
        let err = server.recv(&Framed).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::TruncatedMessage {
                expected: 100,
                received: 16
            }
        ));
    }

    #[tokio::test]
    async fn test_clean_eof_and_short_header() {
        let (left, right) = duplex(64);
        drop(left);
        let mut server = Connection::new(right, "server");
        assert!(server.read_frame().await.unwrap().is_none());
        assert!(matches!(
            server.recv(&Framed).await.unwrap_err(),
            AppError::ConnectionClosed
        ));

        let (mut left, right) = duplex(64);
        left.write_all(&[0, 0]).await.unwrap();
        drop(left);
        let mut server = Connection::new(right, "server");
        assert!(matches!(
            server.read_frame().await.unwrap_err(),
            AppError::InvalidHeader(_)
        ));
    }

    #[tokio::test]
    async fn test_raw_bytes_read_until_close_or_limit() {
        let (mut left, right) = duplex(64);
        left.write_all(b"1234").await.unwrap();
        drop(left);
        let mut server = Connection::new(right, "server");
        assert_eq!(
            server.recv(&RawBytes::new()).await.unwrap().as_ref(),
            b"1234"
        );

        let (mut left, right) = duplex(64);
        left.write_all(b"abcdef").await.unwrap();
        let mut server = Connection::new(right, "server");
        assert_eq!(
            server.recv(&RawBytes::with_max_bytes(4)).await.unwrap().as_ref(),
            b"abcd"
        );
        drop(left);
    }

    #[tokio::test]
    async fn test_unbounded_raw_read_stops_at_frame_limit() {
        let (mut left, right) = duplex(64);
        let writer = tokio::spawn(async move {
            // the reader gives up early, so later writes may fail
            let _ = left.write_all(&[b'x'; 200]).await;
        });
        let mut server = Connection::new(right, "server").with_max_frame_len(16);
        let err = server.recv(&RawBytes::new()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidValue(_)), "{err}");
        drop(server);
        writer.await.unwrap();

        let (mut left, right) = duplex(64);
        left.write_all(&[b'y'; 16]).await.unwrap();
        drop(left);
        let mut server = Connection::new(right, "server").with_max_frame_len(16);
        assert_eq!(server.recv(&RawBytes::new()).await.unwrap().len(), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_deadline() {
        let (_left, right) = duplex(64);
        let mut server =
            Connection::new(right, "server").with_read_timeout(Some(Duration::from_secs(5)));
        let err = server.recv(&Framed).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout { operation: "reading", .. }));
    }

    #[tokio::test]
    async fn test_frame_limit() {
        let (mut left, right) = duplex(64);
        let mut raw = BytesMut::new();
        raw.put_u32(1024);
        left.write_all(&raw).await.unwrap();
        let mut server = Connection::new(right, "server").with_max_frame_len(512);
        assert!(matches!(
            server.read_frame().await.unwrap_err(),
            AppError::InvalidHeader(_)
        ));
    }
}

//! Buffered, timeout-guarded socket I/O.
//!
//! `FramedStream` owns the read-ahead buffer for one socket. Protocol lines
//! and body bytes are pulled from the buffer first, so bytes a peer sends
//! ahead of time are never lost; `into_parts` hands any unconsumed remainder
//! back to the caller, which matters when a CONNECT client pipelines payload
//! behind its request head.

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Runs one socket operation under the receive timeout.
pub(crate) async fn with_io_timeout<T, F>(timeout: Duration, operation: F) -> io::Result<T>
where
    F: std::future::Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no progress within {}s", timeout.as_secs()),
        )),
    }
}

pub struct FramedStream<S> {
    stream: S,
    buffer: BytesMut,
    timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK_BYTES),
            timeout,
        }
    }

    /// Reads one `\n`-terminated line, stripping the terminator and an
    /// optional preceding `\r`. Returns `None` on a clean close before any
    /// byte of a line; a close mid-line is an `UnexpectedEof` error. Lines
    /// longer than `max_line_bytes` and lines that are not valid UTF-8 fail
    /// with `InvalidData`.
    pub async fn read_line(&mut self, max_line_bytes: usize) -> io::Result<Option<String>> {
        loop {
            if let Some(position) = self.buffer.iter().position(|&byte| byte == b'\n') {
                let mut line = self.buffer.split_to(position + 1);
                line.truncate(position);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                if line.len() > max_line_bytes {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("protocol line exceeds {max_line_bytes} bytes"),
                    ));
                }
                let text = String::from_utf8(line.to_vec()).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "protocol line is not valid utf-8")
                })?;
                return Ok(Some(text));
            }

            // No terminator yet; allow for a CRLF still in flight.
            if self.buffer.len() > max_line_bytes + 2 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("protocol line exceeds {max_line_bytes} bytes"),
                ));
            }

            if self.fill_buffer().await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed in the middle of a line",
                ));
            }
        }
    }

    /// Reads exactly `len` bytes, draining the buffer before touching the
    /// socket.
    pub async fn read_exact(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            if self.buffer.is_empty() && self.fill_buffer().await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection closed after {} of {len} bytes", out.len()),
                ));
            }
            let take = (len - out.len()).min(self.buffer.len());
            out.extend_from_slice(&self.buffer.split_to(take));
        }
        Ok(out)
    }

    /// Returns whatever bytes are available next, or `None` once the peer
    /// has closed. Used for close-delimited bodies.
    pub async fn read_available(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.buffer.is_empty() && self.fill_buffer().await? == 0 {
            return Ok(None);
        }
        let len = self.buffer.len();
        Ok(Some(self.buffer.split_to(len).to_vec()))
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        with_io_timeout(self.timeout, self.stream.write_all(bytes)).await
    }

    /// Releases the underlying stream together with any read-ahead bytes
    /// that were buffered but not consumed.
    pub fn into_parts(self) -> (S, BytesMut) {
        (self.stream, self.buffer)
    }

    async fn fill_buffer(&mut self) -> io::Result<usize> {
        self.buffer.reserve(READ_CHUNK_BYTES);
        with_io_timeout(self.timeout, self.stream.read_buf(&mut self.buffer)).await
    }
}

//! Line-oriented asynchronous socket.
//!
//! [`LineSocket`] frames a byte stream into `\n`-terminated lines. It owns
//! both halves of the stream, so moving a `LineSocket` moves the whole
//! connection: this is how an authenticated connection is handed from a
//! [`ControlClient`](crate::ControlClient) to a [`Buddy`](crate::Buddy).
//!
//! Reading is cancel safe. Partially received lines stay in an internal
//! buffer, which lets the control client use [`LineSocket::read_line`] as a
//! `tokio::select!` branch without losing data.

use std::fmt;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::notice::NoticeCode;
use crate::protocol::Command;

/// Default upper bound on the length of a single line, in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Transport-level failure of a [`LineSocket`].
#[derive(Debug, Error)]
pub enum SocketError {
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,
    /// Reading failed.
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),
    /// Writing failed.
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
    /// The peer sent more than the allowed bytes without a newline.
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
}

impl SocketError {
    /// Notice code describing this failure.
    pub fn code(&self) -> NoticeCode {
        match self {
            SocketError::Closed => NoticeCode::SocketReadClosed,
            SocketError::Read(_) => NoticeCode::SocketReadFailed,
            SocketError::Write(_) => NoticeCode::SocketWriteFailed,
            SocketError::LineTooLong(_) => NoticeCode::SocketLineTooLong,
        }
    }
}

/// A byte stream framed into lines.
pub struct LineSocket {
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
    pending: Vec<u8>,
    max_line_length: usize,
}

impl LineSocket {
    /// Wraps a stream, e.g. an accepted `TcpStream`.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(Box::new(read_half)),
            writer: Box::new(write_half),
            pending: Vec::new(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Sets the maximum accepted line length.
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Maximum accepted line length, in bytes.
    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// Reads the next line, without its trailing newline.
    ///
    /// # Errors
    ///
    /// - [`SocketError::Closed`] at end of stream (a trailing partial line is dropped)
    /// - [`SocketError::Read`] on I/O failure
    /// - [`SocketError::LineTooLong`] when the limit is exceeded before a newline
    pub async fn read_line(&mut self) -> Result<Vec<u8>, SocketError> {
        loop {
            if let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
                if end > self.max_line_length {
                    return Err(SocketError::LineTooLong(self.max_line_length));
                }
                let mut line: Vec<u8> = self.pending.drain(..=end).collect();
                line.pop();
                return Ok(line);
            }
            if self.pending.len() > self.max_line_length {
                return Err(SocketError::LineTooLong(self.max_line_length));
            }

            let consumed = {
                let available = self.reader.fill_buf().await.map_err(SocketError::Read)?;
                if available.is_empty() {
                    return Err(SocketError::Closed);
                }
                let take = match available.iter().position(|&b| b == b'\n') {
                    Some(end) => end + 1,
                    None => available.len(),
                };
                self.pending.extend_from_slice(&available[..take]);
                take
            };
            self.reader.consume(consumed);
        }
    }

    /// Writes `line` followed by a newline and flushes.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Write`] on I/O failure.
    pub async fn send_line(&mut self, line: &[u8]) -> Result<(), SocketError> {
        self.writer
            .write_all(line)
            .await
            .map_err(SocketError::Write)?;
        self.writer
            .write_all(b"\n")
            .await
            .map_err(SocketError::Write)?;
        self.writer.flush().await.map_err(SocketError::Write)
    }

    /// Encodes and writes a command.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Write`] on I/O failure.
    pub async fn send_command(&mut self, command: &Command) -> Result<(), SocketError> {
        self.send_line(&command.to_line()).await
    }
}

impl fmt::Debug for LineSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineSocket")
            .field("pending", &self.pending.len())
            .field("max_line_length", &self.max_line_length)
            .finish_non_exhaustive()
    }
}

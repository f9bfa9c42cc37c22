// Channel - byte-stream connection to a subprocess or socket
// Supports line-based and length-prefixed framing over any
// AsyncRead/AsyncWrite pair.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Upper bound for length-prefixed frames. A prefix beyond this is a
/// protocol-level corruption, not a real frame.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ChannelError {
    /// Peer closed the stream (EOF / broken pipe). Distinguishable from
    /// other IO faults because a closed command channel means the child
    /// is gone.
    #[error("Channel closed by peer")]
    Closed,

    #[error("Frame length {0} exceeds limit")]
    FrameTooLarge(u32),

    #[error("Embedded newline in line payload")]
    EmbeddedNewline,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reading half of a channel.
pub struct ChannelReader {
    inner: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
}

impl ChannelReader {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            inner: BufReader::new(Box::new(reader)),
        }
    }

    /// Read one newline-terminated line, without the terminator
    /// (trailing `\r` is stripped as well).
    ///
    /// # Errors
    /// - `ChannelError::Closed` on EOF
    pub async fn recv_line(&mut self) -> Result<String, ChannelError> {
        use tokio::io::AsyncBufReadExt;

        let mut line = String::new();
        let n = self.inner.read_line(&mut line).await?;
        if n == 0 {
            return Err(ChannelError::Closed);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    /// Read one length-prefixed frame (u32 big-endian prefix).
    pub async fn recv_frame(&mut self) -> Result<Vec<u8>, ChannelError> {
        let len = match self.inner.read_u32().await {
            Ok(len) => len,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ChannelError::Closed)
            }
            Err(e) => return Err(e.into()),
        };
        if len > MAX_FRAME_LEN {
            return Err(ChannelError::FrameTooLarge(len));
        }
        let mut buf = vec![0u8; len as usize];
        self.inner
            .read_exact(&mut buf)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => ChannelError::Closed,
                _ => ChannelError::Io(e),
            })?;
        Ok(buf)
    }
}

/// Writing half of a channel.
pub struct ChannelWriter {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
}

impl ChannelWriter {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(writer),
        }
    }

    /// Write one line plus terminator and flush.
    ///
    /// # Errors
    /// - `ChannelError::EmbeddedNewline` if the payload itself contains
    ///   a line break (would desynchronize the peer)
    pub async fn send_line(&mut self, line: &str) -> Result<(), ChannelError> {
        if line.contains('\n') || line.contains('\r') {
            return Err(ChannelError::EmbeddedNewline);
        }
        self.inner.write_all(line.as_bytes()).await.map_err(map_broken_pipe)?;
        self.inner.write_all(b"\n").await.map_err(map_broken_pipe)?;
        self.inner.flush().await.map_err(map_broken_pipe)?;
        Ok(())
    }

    /// Write one length-prefixed frame and flush.
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        if payload.len() > MAX_FRAME_LEN as usize {
            return Err(ChannelError::FrameTooLarge(MAX_FRAME_LEN));
        }
        let len = payload.len() as u32;
        self.inner.write_u32(len).await.map_err(map_broken_pipe)?;
        self.inner.write_all(payload).await.map_err(map_broken_pipe)?;
        self.inner.flush().await.map_err(map_broken_pipe)?;
        Ok(())
    }

    /// Close the writing direction (teardown).
    pub async fn shutdown(&mut self) -> Result<(), ChannelError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

fn map_broken_pipe(e: std::io::Error) -> ChannelError {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => {
            ChannelError::Closed
        }
        _ => ChannelError::Io(e),
    }
}

/// A duplex channel: reading and writing half over one connection.
pub struct Channel {
    pub reader: ChannelReader,
    pub writer: ChannelWriter,
}

impl Channel {
    pub fn from_parts(reader: ChannelReader, writer: ChannelWriter) -> Self {
        Self { reader, writer }
    }

    /// Wrap a connected TCP socket.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (r, w) = stream.into_split();
        Self {
            reader: ChannelReader::new(r),
            writer: ChannelWriter::new(w),
        }
    }
}

// Remote Adapter Wire Protocol (byte-exact)
//
// Generator side, over the child's stdio:
//   1. Handshake: decimal `n` + newline on stdin, then `n` lines of
//      URL-encoded action names (raw names in no-encode mode, which
//      forbids embedded line breaks).
//   2. Request: decimal 0-based suggested index + newline on stdin.
//   3. Response: decimal integer on stderr - 1-based executed index,
//      0 = unidentified.
//   4. Async output: decimal output indices on stdout at any time,
//      independent of the request loop.
//
// Internally indices are 1-based with 0 reserved; the request line is
// the only place the offset shows up on the wire.

use thiserror::Error;

use testrig_core::domain::{ActionIndex, UNIDENTIFIED};
use testrig_core::port::AdapterError;

use crate::channel::{ChannelError, ChannelReader, ChannelWriter};

/// Handshake name encoding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// URL-encode names (reserved characters survive the line framing).
    #[default]
    Url,
    /// Send raw names; names with embedded line breaks are rejected.
    Raw,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Channel fault: {0}")]
    Channel(#[from] ChannelError),

    #[error("Malformed protocol line: {0:?}")]
    Malformed(String),

    #[error("Action name contains line break: {0:?}")]
    NameContainsNewline(String),

    #[error("Index 0 cannot be requested (reserved for unidentified)")]
    ReservedIndex,
}

impl From<ProtocolError> for AdapterError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Channel(ChannelError::Closed) => {
                AdapterError::ChildExited("channel closed".into())
            }
            ProtocolError::Channel(c) => AdapterError::Channel(c.to_string()),
            other => AdapterError::Protocol(other.to_string()),
        }
    }
}

/// Encoder/decoder for the wire protocol over channels. Stateless
/// apart from the encoding mode; both the generator side (bridge) and
/// the serving side (daemon) go through it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteProtocolEngine {
    encoding: Encoding,
}

impl RemoteProtocolEngine {
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    // ---- generator side -------------------------------------------------

    /// Send the handshake: action count, then one name per line.
    pub async fn send_handshake<'a>(
        &self,
        w: &mut ChannelWriter,
        names: impl ExactSizeIterator<Item = &'a str>,
    ) -> Result<(), ProtocolError> {
        w.send_line(&names.len().to_string()).await?;
        for name in names {
            let encoded = match self.encoding {
                Encoding::Url => urlencoding::encode(name).into_owned(),
                Encoding::Raw => {
                    if name.contains('\n') || name.contains('\r') {
                        return Err(ProtocolError::NameContainsNewline(name.to_string()));
                    }
                    name.to_string()
                }
            };
            w.send_line(&encoded).await?;
        }
        Ok(())
    }

    /// Write one suggested action (internal 1-based index, sent 0-based).
    pub async fn send_request(
        &self,
        w: &mut ChannelWriter,
        suggested: ActionIndex,
    ) -> Result<(), ProtocolError> {
        if suggested == UNIDENTIFIED {
            return Err(ProtocolError::ReservedIndex);
        }
        w.send_line(&(suggested - 1).to_string()).await?;
        Ok(())
    }

    /// Read one executed-index response (1-based, 0 = unidentified).
    pub async fn read_response(
        &self,
        r: &mut ChannelReader,
    ) -> Result<ActionIndex, ProtocolError> {
        self.read_index_line(r).await
    }

    /// Read one asynchronous output-action index.
    pub async fn read_output(&self, r: &mut ChannelReader) -> Result<ActionIndex, ProtocolError> {
        self.read_index_line(r).await
    }

    // ---- serving side ---------------------------------------------------

    /// Read the handshake, returning decoded action names in order.
    pub async fn read_handshake(
        &self,
        r: &mut ChannelReader,
    ) -> Result<Vec<String>, ProtocolError> {
        let count_line = r.recv_line().await?;
        let count: usize = count_line
            .trim()
            .parse()
            .map_err(|_| ProtocolError::Malformed(count_line.clone()))?;

        let mut names = Vec::with_capacity(count);
        for _ in 0..count {
            let line = r.recv_line().await?;
            let name = match self.encoding {
                Encoding::Url => urlencoding::decode(&line)
                    .map_err(|_| ProtocolError::Malformed(line.clone()))?
                    .into_owned(),
                Encoding::Raw => line,
            };
            names.push(name);
        }
        Ok(names)
    }

    /// Read one request, returning the internal 1-based index.
    pub async fn read_request(&self, r: &mut ChannelReader) -> Result<ActionIndex, ProtocolError> {
        let wire = self.read_index_line(r).await?;
        Ok(wire + 1)
    }

    /// Write one executed-index response.
    pub async fn send_response(
        &self,
        w: &mut ChannelWriter,
        executed: ActionIndex,
    ) -> Result<(), ProtocolError> {
        w.send_line(&executed.to_string()).await?;
        Ok(())
    }

    /// Write one asynchronous output-action index.
    pub async fn send_output(
        &self,
        w: &mut ChannelWriter,
        index: ActionIndex,
    ) -> Result<(), ProtocolError> {
        w.send_line(&index.to_string()).await?;
        Ok(())
    }

    async fn read_index_line(&self, r: &mut ChannelReader) -> Result<ActionIndex, ProtocolError> {
        let line = r.recv_line().await?;
        line.trim()
            .parse()
            .map_err(|_| ProtocolError::Malformed(line))
    }
}

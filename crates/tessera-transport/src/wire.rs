//! Envelope and newline-delimited JSON codec.
//!
//! ## Wire format
//!
//! ```text
//! Envelope {
//!     id:       u64,          // Sender-chosen, unique per connection direction
//!     reply_to: Option<u64>,  // Request id this envelope answers
//!     message:  Message,      // {"kind": ..., "payload": ...}
//! }
//! ```
//!
//! One envelope per line, UTF-8 JSON, terminated by `\n`.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::messages::Message;
use crate::{Result, TransportError};

/// Maximum encoded line length, including the terminator.
pub const MAX_LINE_LEN: usize = 1 << 20;

/// Message envelope correlating requests and responses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<u64>,
    pub message: Message,
}

impl Envelope {
    /// A request or unsolicited push.
    pub fn new(id: u64, message: Message) -> Self {
        Self {
            id,
            reply_to: None,
            message,
        }
    }

    /// A response to the envelope with id `reply_to`.
    pub fn reply(id: u64, reply_to: u64, message: Message) -> Self {
        Self {
            id,
            reply_to: Some(reply_to),
            message,
        }
    }

    /// Serialize to a single line, including the trailing `\n`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Serialization`] if a payload fails to serialize
    /// - [`TransportError::ProtocolViolation`] if the line exceeds [`MAX_LINE_LEN`]
    pub fn encode_line(&self) -> Result<Vec<u8>> {
        let mut line =
            serde_json::to_vec(self).map_err(|e| TransportError::Serialization(e.to_string()))?;
        line.push(b'\n');
        if line.len() > MAX_LINE_LEN {
            return Err(TransportError::ProtocolViolation(format!(
                "envelope of {} bytes exceeds {MAX_LINE_LEN}",
                line.len()
            )));
        }
        Ok(line)
    }

    /// Parse one line (with or without its terminator).
    pub fn decode_line(line: &str) -> Result<Self> {
        if line.len() > MAX_LINE_LEN {
            return Err(TransportError::ProtocolViolation(format!(
                "line of {} bytes exceeds {MAX_LINE_LEN}",
                line.len()
            )));
        }
        serde_json::from_str(line.trim_end())
            .map_err(|e| TransportError::Deserialization(e.to_string()))
    }
}

/// Write one envelope and flush.
pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = envelope.encode_line()?;
    writer.write_all(&line).await?;
    writer.flush().await?;
    trace!(id = envelope.id, kind = envelope.message.kind(), "envelope written");
    Ok(())
}

/// Read the next envelope. Returns `Ok(None)` at end of stream. Blank lines
/// are skipped.
///
/// `buf` is reused between calls to avoid reallocating per line. At most
/// `MAX_LINE_LEN + 1` bytes are buffered for one line.
///
/// # Errors
///
/// - [`TransportError::ProtocolViolation`] if no terminator arrives within
///   [`MAX_LINE_LEN`] bytes
pub async fn read_envelope<R>(reader: &mut R, buf: &mut String) -> Result<Option<Envelope>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        buf.clear();
        let read = (&mut *reader)
            .take(MAX_LINE_LEN as u64 + 1)
            .read_line(buf)
            .await?;
        if read == 0 {
            return Ok(None);
        }
        if read > MAX_LINE_LEN && !buf.ends_with('\n') {
            return Err(TransportError::ProtocolViolation(format!(
                "no line terminator within {MAX_LINE_LEN} bytes"
            )));
        }
        if buf.trim().is_empty() {
            continue;
        }
        let envelope = Envelope::decode_line(buf)?;
        trace!(id = envelope.id, kind = envelope.message.kind(), "envelope read");
        return Ok(Some(envelope));
    }
}

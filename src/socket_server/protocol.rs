//! Binary wire protocol
//!
//! Every value on the wire is either a single byte or a framed string: one
//! length byte (0 to 254) followed by that many raw bytes, no terminator.
//!
//! ```text
//! init      server → client   INIT1 INIT2 <path> <period>
//! reject    server → client   END_COM <reason>
//! update    server → client   <count> <message>*count [<pending>]
//! teardown  initiator → peer  REQ1 REQ2
//!           peer → initiator  END_COM "Goodbye"
//! ```
//!
//! The codec is shared by the server and the client and works on any tokio
//! stream half, which is how the tests drive it over `tokio::io::duplex`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{DirappError, Result};
use crate::monitor::entry::truncate_utf8;
use crate::monitor::Change;

/// Handshake start
pub const INIT1: u8 = 0xFE;
/// Handshake continuation
pub const INIT2: u8 = 0xED;
/// Teardown request, first byte
pub const REQ1: u8 = 0xDE;
/// Teardown request, second byte
pub const REQ2: u8 = 0xAD;
/// Terminal or error marker
pub const END_COM: u8 = 0xFF;
/// Teardown acknowledgment
pub const GOODBYE: &str = "Goodbye";
/// Sent to a connection refused because the registry is full
pub const REJECT_MESSAGE: &str = "No more clients can be accepted.";

/// Longest payload of a framed string
pub const MAX_FRAME: usize = 254;
/// Read buffer size; a length byte must be strictly below it
pub const READ_CAPACITY: usize = 255;
/// Most messages carried by one update batch
pub const MAX_BATCH: usize = 254;

/// Contents of the init handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub path: String,
    pub period: u8,
}

/// Read exactly one byte
pub async fn read_byte<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8> {
    reader.read_u8().await.map_err(DirappError::from_read)
}

/// Read a framed string whose length must stay below `max_len`
///
/// Invalid UTF-8 is decoded lossily; filenames are not guaranteed to be UTF-8.
pub async fn read_string<R: AsyncRead + Unpin>(reader: &mut R, max_len: usize) -> Result<String> {
    let length = read_byte(reader).await? as usize;
    if length >= max_len {
        return Err(DirappError::Framing {
            length,
            capacity: max_len,
        });
    }
    let mut buf = vec![0u8; length];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(DirappError::from_read)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub async fn send_byte<W: AsyncWrite + Unpin>(writer: &mut W, byte: u8) -> Result<()> {
    writer.write_all(&[byte]).await?;
    writer.flush().await?;
    Ok(())
}

/// Send a framed string
pub async fn send_string<W: AsyncWrite + Unpin>(writer: &mut W, s: &str) -> Result<()> {
    let mut buf = Vec::with_capacity(s.len() + 1);
    push_frame(&mut buf, s.as_bytes())?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

fn push_frame(buf: &mut Vec<u8>, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME {
        return Err(DirappError::Framing {
            length: payload.len(),
            capacity: MAX_FRAME,
        });
    }
    buf.push(payload.len() as u8);
    buf.extend_from_slice(payload);
    Ok(())
}

/// Server half of the init handshake
pub async fn send_greeting<W: AsyncWrite + Unpin>(
    writer: &mut W,
    directory: &str,
    period: u8,
) -> Result<()> {
    let mut buf = Vec::with_capacity(directory.len() + 4);
    buf.push(INIT1);
    buf.push(INIT2);
    push_frame(&mut buf, directory.as_bytes())?;
    buf.push(period);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Client half of the init handshake
///
/// A server that answers with `END_COM` is refusing the connection; its
/// reason comes back as [`DirappError::ServerRejected`].
pub async fn receive_greeting<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Greeting> {
    match read_byte(reader).await? {
        INIT1 => {}
        END_COM => {
            let reason = read_string(reader, READ_CAPACITY).await?;
            return Err(DirappError::ServerRejected(reason));
        }
        other => {
            return Err(DirappError::ProtocolViolation {
                expected: "INIT1 (0xfe)",
                received: other,
            })
        }
    }
    expect_byte(reader, INIT2, "INIT2 (0xed)").await?;

    let path = read_string(reader, READ_CAPACITY).await?;
    let period = read_byte(reader).await?;
    if period == 0 {
        return Err(DirappError::ProtocolViolation {
            expected: "refresh period in 1..=255",
            received: period,
        });
    }
    Ok(Greeting { path, period })
}

/// Send `END_COM` followed by `message`, cut to fit a frame
pub async fn send_error<W: AsyncWrite + Unpin>(writer: &mut W, message: &str) -> Result<()> {
    let mut buf = Vec::with_capacity(message.len() + 2);
    buf.push(END_COM);
    push_frame(&mut buf, truncate_utf8(message, MAX_FRAME).as_bytes())?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Initiator side of teardown: send the request
pub async fn request_teardown<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(&[REQ1, REQ2]).await?;
    writer.flush().await?;
    Ok(())
}

/// Initiator side of teardown: expect `END_COM` + `"Goodbye"`
pub async fn await_goodbye<R: AsyncRead + Unpin>(reader: &mut R) -> Result<()> {
    expect_byte(reader, END_COM, "END_COM (0xff)").await?;
    expect_goodbye(reader).await
}

/// The `"Goodbye"` string that follows an `END_COM` already consumed
pub async fn expect_goodbye<R: AsyncRead + Unpin>(reader: &mut R) -> Result<()> {
    let reply = read_string(reader, READ_CAPACITY).await?;
    if reply != GOODBYE {
        return Err(DirappError::ProtocolViolation {
            expected: "\"Goodbye\"",
            received: reply.bytes().next().unwrap_or(0),
        });
    }
    Ok(())
}

/// Responder side of teardown: read `REQ1`/`REQ2`, reply `END_COM` + `"Goodbye"`
pub async fn answer_teardown<R, W>(reader: &mut R, writer: &mut W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    expect_byte(reader, REQ1, "REQ1 (0xde)").await?;
    expect_byte(reader, REQ2, "REQ2 (0xad)").await?;
    send_error(writer, GOODBYE).await
}

async fn expect_byte<R: AsyncRead + Unpin>(
    reader: &mut R,
    wanted: u8,
    expected: &'static str,
) -> Result<()> {
    let received = read_byte(reader).await?;
    if received != wanted {
        return Err(DirappError::ProtocolViolation { expected, received });
    }
    Ok(())
}

/// Write the wire text for one change into `buf`
///
/// `"+name "`, `"-name "` or `"!name -> category"`. The filename bytes are
/// copied unchanged and cut by byte count so the whole message fits in one
/// frame.
pub fn format_change(buf: &mut Vec<u8>, change: &Change) {
    buf.clear();
    let (tag, suffix) = match change {
        Change::Added(_) => (b'+', None),
        Change::Removed(_) => (b'-', None),
        Change::Modified(_, attr) => (b'!', Some(attr.describe())),
    };
    let reserved = 1 + suffix.map_or(1, |s| s.len() + 4);
    let name = change.filename();
    let name = &name[..name.len().min(MAX_FRAME - reserved)];

    buf.push(tag);
    buf.extend_from_slice(name);
    match suffix {
        Some(category) => {
            buf.extend_from_slice(b" -> ");
            buf.extend_from_slice(category.as_bytes());
        }
        None => buf.push(b' '),
    }
}

/// One cycle's worth of update messages, encoded once and written to every
/// subscriber
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateBatch {
    /// Total number of changes in the cycle
    pub count: usize,
    /// Rendered messages, at most [`MAX_BATCH`]
    pub messages: Vec<Vec<u8>>,
}

impl UpdateBatch {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            messages: Vec::with_capacity(count.min(MAX_BATCH)),
        }
    }

    /// Count byte at the head of the batch
    pub fn header(&self) -> u8 {
        self.count.min(MAX_BATCH) as u8
    }

    /// Trailing byte announcing changes that did not fit
    pub fn pending(&self) -> Option<u8> {
        (self.count > MAX_BATCH).then(|| (self.count - MAX_BATCH).min(MAX_BATCH) as u8)
    }

    pub fn is_full(&self) -> bool {
        self.messages.len() >= MAX_BATCH
    }

    /// Append a rendered message; ignored once the batch is full
    pub fn push(&mut self, message: &[u8]) {
        if !self.is_full() {
            self.messages.push(message.to_vec());
        }
    }

    /// Wire encoding of the whole batch
    pub fn encode(&self) -> Result<Vec<u8>> {
        let size = 2 + self.messages.iter().map(|m| m.len() + 1).sum::<usize>();
        let mut buf = Vec::with_capacity(size);
        buf.push(self.header());
        for message in &self.messages {
            push_frame(&mut buf, message)?;
        }
        if let Some(pending) = self.pending() {
            buf.push(pending);
        }
        Ok(buf)
    }
}

/// Write a pre-encoded batch
pub async fn send_encoded<W: AsyncWrite + Unpin>(writer: &mut W, encoded: &[u8]) -> Result<()> {
    writer.write_all(encoded).await?;
    writer.flush().await?;
    Ok(())
}

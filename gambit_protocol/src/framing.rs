// Length-delimited JSON framing over TCP.
//
// Wire format: a 4-byte big-endian length prefix followed by a JSON payload.
// `write_message` / `read_message` move raw byte frames; `send_frame` /
// `recv_frame` wrap them with serde_json so callers deal in protocol types
// and a single `FrameError`.
//
// `MAX_MESSAGE_SIZE` (1 MiB) bounds allocation from a bad length prefix. The
// largest legitimate frame is a resume descriptor carrying a full move
// history, which stays far below that.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Maximum allowed frame payload (1 MiB).
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

/// Failure while sending or receiving a typed frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("frame payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl FrameError {
    /// True when the peer closed the stream (cleanly or mid-frame).
    pub fn is_eof(&self) -> bool {
        matches!(self, FrameError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Write one frame: 4-byte big-endian length, then payload, then flush.
pub fn write_message<W: Write>(writer: &mut W, msg: &[u8]) -> io::Result<()> {
    let len = u32::try_from(msg.len())
        .ok()
        .filter(|len| *len <= MAX_MESSAGE_SIZE)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "message too large: {} bytes (max {MAX_MESSAGE_SIZE})",
                    msg.len()
                ),
            )
        })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(msg)?;
    writer.flush()
}

/// Read one frame. `UnexpectedEof` if the stream ends before or inside a
/// frame, `InvalidData` if the prefix exceeds `MAX_MESSAGE_SIZE`.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Serialize `msg` to JSON and write it as one frame.
pub fn send_frame<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<(), FrameError> {
    let json = serde_json::to_vec(msg)?;
    write_message(writer, &json)?;
    Ok(())
}

/// Read one frame and deserialize it.
pub fn recv_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T, FrameError> {
    let bytes = read_message(reader)?;
    Ok(serde_json::from_slice(&bytes)?)
}

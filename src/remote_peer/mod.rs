//! The Remote Peer Link (spec §6.3): a framed request/response protocol over
//! a reliable byte stream, split into a reader task and a writer task per
//! the concurrency model's "reader thread" / "writer thread" (spec §5),
//! expressed here as tokio tasks since the transport is async TCP.

pub mod messages;
pub mod reader;
pub mod writer;

use crate::error::TransportError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Encodes one frame: `tag:i8, length:i32 BE, UTF-8 payload`.
pub fn encode_frame(tag: i8, payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut frame = Vec::with_capacity(5 + bytes.len());
    frame.push(tag as u8);
    frame.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
    frame.extend_from_slice(bytes);
    frame
}

/// Reads one frame from an async reader, or `Err(TransportError::Disconnected)`
/// on a clean EOF at a frame boundary.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<(i8, String), TransportError> {
    let mut tag_buf = [0u8; 1];
    match reader.read_exact(&mut tag_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(TransportError::Disconnected),
        Err(e) => return Err(TransportError::Io(e)),
    }
    let tag = tag_buf[0] as i8;

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = i32::from_be_bytes(len_buf);
    let len = usize::try_from(len).map_err(|_| TransportError::InvalidUtf8)?;

    let mut payload_buf = vec![0u8; len];
    reader.read_exact(&mut payload_buf).await?;
    let payload = String::from_utf8(payload_buf).map_err(|_| TransportError::InvalidUtf8)?;
    Ok((tag, payload))
}

pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, tag: i8, payload: &str) -> Result<(), TransportError> {
    writer.write_all(&encode_frame(tag, payload)).await?;
    writer.flush().await?;
    Ok(())
}

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::message::Message;
use crate::common::{ProtocolError, TransportError, WireError};

/// Frames are a little-endian `u32` length followed by that many bytes of JSON.
pub const MAX_FRAME_LEN: usize = 8_000_000;

pub type FrameReader = Box<dyn AsyncRead + Send + Unpin>;
pub type FrameWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub fn encode_frame(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let data = serde_json::to_vec(message)?;
    if data.is_empty() || data.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameLength(data.len()));
    }
    let mut frame = Vec::with_capacity(4 + data.len());
    frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
    frame.extend_from_slice(&data);
    Ok(frame)
}

/// Writes one whole frame. The caller serialises concurrent writers.
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode_frame(message)?;
    writer
        .write_all(&frame)
        .await
        .map_err(TransportError::Write)?;
    writer.flush().await.map_err(TransportError::Write)?;
    Ok(())
}

/// Reads the next frame. `Ok(None)` means the remote closed the stream
/// cleanly between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Message>, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(TransportError::Read(err).into()),
    };
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameLength(len).into());
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await.map_err(|err| match err.kind() {
        ErrorKind::UnexpectedEof => TransportError::Closed,
        _ => TransportError::Read(err),
    })?;

    let message = serde_json::from_slice(&data).map_err(ProtocolError::Decode)?;
    Ok(Some(message))
}

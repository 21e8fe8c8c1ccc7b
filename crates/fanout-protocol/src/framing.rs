//! Multipart framing over a byte stream.
//!
//! The transport contract needs message-oriented multipart frames on top of
//! TCP: one wire message is a 4-byte big-endian length (validated against
//! [`MAX_MESSAGE_SIZE`] before the body is read), a 4-byte big-endian part
//! count, then each part as a 4-byte big-endian length plus raw bytes.
//! Both sides of every channel use this codec.

use crate::error::{ProtocolError, Result};
use crate::MAX_MESSAGE_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum number of parts in one message. The protocol never uses more
/// than two (text line + payload).
pub const MAX_PARTS: usize = 16;

/// Read one multipart message from `stream`, reusing `buffer` for the body.
///
/// Returns `Ok(None)` on a clean disconnect (EOF on the length prefix).
pub async fn read_message<S>(stream: &mut S, buffer: &mut BytesMut) -> Result<Option<Vec<Bytes>>>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let msg_len = u32::from_be_bytes(len_buf) as usize;
    if msg_len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(msg_len, MAX_MESSAGE_SIZE));
    }

    buffer.clear();
    buffer.resize(msg_len, 0);
    stream.read_exact(buffer).await?;

    let mut body = buffer.split().freeze();
    if body.remaining() < 4 {
        return Err(ProtocolError::InvalidFraming("missing part count"));
    }
    let count = body.get_u32() as usize;
    if count == 0 || count > MAX_PARTS {
        return Err(ProtocolError::InvalidFraming("part count out of range"));
    }

    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        if body.remaining() < 4 {
            return Err(ProtocolError::InvalidFraming("truncated part header"));
        }
        let part_len = body.get_u32() as usize;
        if part_len > body.remaining() {
            return Err(ProtocolError::InvalidFraming("truncated part body"));
        }
        frames.push(body.split_to(part_len));
    }
    if body.has_remaining() {
        return Err(ProtocolError::InvalidFraming("trailing bytes"));
    }

    Ok(Some(frames))
}

/// Write one multipart message to `stream`.
pub async fn write_message<S>(stream: &mut S, frames: &[Bytes]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    if frames.is_empty() || frames.len() > MAX_PARTS {
        return Err(ProtocolError::InvalidFraming("part count out of range"));
    }

    let body_len = 4 + frames.iter().map(|f| 4 + f.len()).sum::<usize>();
    if body_len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(body_len, MAX_MESSAGE_SIZE));
    }

    let mut buf = BytesMut::with_capacity(4 + body_len);
    buf.put_u32(body_len as u32);
    buf.put_u32(frames.len() as u32);
    for frame in frames {
        buf.put_u32(frame.len() as u32);
        buf.put_slice(frame);
    }

    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

//! # Stream Framing
//!
//! Every message on a peer or loopback stream is length-prefixed:
//!
//! ```text
//! [len: u32 LE][payload: len bytes]
//! ```
//!
//! Acknowledgments are frames whose payload is a UTF-8 string. Timeouts are the
//! caller's concern; these helpers only move bytes.

use crate::errors::TypesError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame we will allocate for (64 MiB).
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Writes one length-prefixed frame and flushes.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), TypesError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(TypesError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, TypesError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TypesError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Serializes `value` with bincode and writes it as one frame.
pub async fn write_message<W, T>(writer: &mut W, value: &T) -> Result<(), TypesError>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize,
{
    let bytes = bincode::serialize(value)?;
    write_frame(writer, &bytes).await
}

/// Reads one frame and decodes it with bincode.
pub async fn read_message<R, T>(reader: &mut R) -> Result<T, TypesError>
where
    R: AsyncRead + Unpin + ?Sized,
    T: DeserializeOwned,
{
    let bytes = read_frame(reader).await?;
    Ok(bincode::deserialize(&bytes)?)
}

/// Writes a textual acknowledgment frame.
pub async fn write_ack<W>(writer: &mut W, ack: &str) -> Result<(), TypesError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_frame(writer, ack.as_bytes()).await
}

/// Reads an acknowledgment frame and checks it equals `expected`.
pub async fn expect_ack<R>(reader: &mut R, expected: &str) -> Result<(), TypesError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let bytes = read_frame(reader).await?;
    if bytes != expected.as_bytes() {
        return Err(TypesError::UnexpectedAck {
            expected: expected.to_string(),
            actual: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    Ok(())
}

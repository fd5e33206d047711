//! Two wire codecs share a connection: a fixed 8-byte header for small
//! control frames (register, finalize, fetch, and their replies), and a
//! 4-byte length-prefixed codec for streamed block-data bytes, which have no
//! size cap since pushed blocks can be arbitrarily large.

use std::io::{self, Read, Write};

use thiserror::Error;

/// `b"SM"` — distinguishes a control frame from a stray byte stream on
/// connection setup.
pub const CONTROL_MAGIC: [u8; 2] = *b"SM";

/// Control payloads are small (JSON-encoded requests/replies); this bounds
/// a single frame well above any real message while still catching a
/// desynced stream quickly.
pub const MAX_CONTROL_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("bad control frame magic")]
    BadMagic,
    #[error("control frame of {0} bytes exceeds the {MAX_CONTROL_LEN} byte limit")]
    TooLarge(u32),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FramingError>;

/// Control message discriminant carried in the header's type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlType {
    RegisterExecutor = 1,
    OpenPush = 2,
    FinalizeShuffleMerge = 3,
    GetMergedBlockMeta = 4,
    GetMergedBlockData = 5,
    Reply = 6,
    Error = 7,
}

impl ControlType {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            1 => Self::RegisterExecutor,
            2 => Self::OpenPush,
            3 => Self::FinalizeShuffleMerge,
            4 => Self::GetMergedBlockMeta,
            5 => Self::GetMergedBlockData,
            6 => Self::Reply,
            7 => Self::Error,
            _ => return None,
        })
    }
}

/// Serializes `payload` as JSON and writes a control frame: 2-byte magic,
/// 1-byte message type, 1-byte reserved flags, 4-byte little-endian length,
/// then the JSON bytes.
pub fn write_control_frame<W: Write, T: serde::Serialize>(
    writer: &mut W,
    msg_type: ControlType,
    payload: &T,
) -> Result<()> {
    let body = serde_json::to_vec(payload)?;
    if body.len() as u64 > MAX_CONTROL_LEN as u64 {
        return Err(FramingError::TooLarge(body.len() as u32));
    }
    let mut header = [0u8; 8];
    header[0..2].copy_from_slice(&CONTROL_MAGIC);
    header[2] = msg_type as u8;
    header[3] = 0;
    header[4..8].copy_from_slice(&(body.len() as u32).to_le_bytes());
    writer.write_all(&header)?;
    writer.write_all(&body)?;
    Ok(())
}

/// Reads one control frame, returning its type byte and raw JSON payload.
/// Callers deserialize the payload with the type implied by `msg_type`.
pub fn read_control_frame<R: Read>(reader: &mut R) -> Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;
    if header[0..2] != CONTROL_MAGIC {
        return Err(FramingError::BadMagic);
    }
    let msg_type = header[2];
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if len > MAX_CONTROL_LEN {
        return Err(FramingError::TooLarge(len));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    Ok((msg_type, body))
}

/// Writes one streamed block-data frame: a 4-byte little-endian length
/// followed by that many raw bytes. A zero-length frame is the end-of-stream
/// sentinel signaling `on_complete`.
pub fn write_stream_frame<W: Write>(writer: &mut W, buf: &[u8]) -> io::Result<()> {
    writer.write_all(&(buf.len() as u32).to_le_bytes())?;
    writer.write_all(buf)
}

/// Writes the end-of-stream sentinel (a zero-length frame).
pub fn write_stream_end<W: Write>(writer: &mut W) -> io::Result<()> {
    writer.write_all(&0u32.to_le_bytes())
}

/// Reads one streamed block-data frame. `Ok(None)` means the zero-length
/// end-of-stream sentinel was read.
pub fn read_stream_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf);
    if len == 0 {
        return Ok(None);
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

#[cfg(feature = "tokio")]
pub mod r#async {
    use super::*;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    pub async fn write_control_frame<W: AsyncWrite + Unpin, T: serde::Serialize>(
        writer: &mut W,
        msg_type: ControlType,
        payload: &T,
    ) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        if body.len() as u64 > MAX_CONTROL_LEN as u64 {
            return Err(FramingError::TooLarge(body.len() as u32));
        }
        let mut header = [0u8; 8];
        header[0..2].copy_from_slice(&CONTROL_MAGIC);
        header[2] = msg_type as u8;
        header[3] = 0;
        header[4..8].copy_from_slice(&(body.len() as u32).to_le_bytes());
        writer.write_all(&header).await?;
        writer.write_all(&body).await?;
        Ok(())
    }

    pub async fn read_control_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(u8, Vec<u8>)> {
        let mut header = [0u8; 8];
        reader.read_exact(&mut header).await?;
        if header[0..2] != CONTROL_MAGIC {
            return Err(FramingError::BadMagic);
        }
        let msg_type = header[2];
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if len > MAX_CONTROL_LEN {
            return Err(FramingError::TooLarge(len));
        }
        let mut body = vec![0u8; len as usize];
        reader.read_exact(&mut body).await?;
        Ok((msg_type, body))
    }

    pub async fn write_stream_frame<W: AsyncWrite + Unpin>(
        writer: &mut W,
        buf: &[u8],
    ) -> io::Result<()> {
        writer.write_all(&(buf.len() as u32).to_le_bytes()).await?;
        writer.write_all(buf).await
    }

    pub async fn write_stream_end<W: AsyncWrite + Unpin>(writer: &mut W) -> io::Result<()> {
        writer.write_all(&0u32.to_le_bytes()).await
    }

    pub async fn read_stream_frame<R: AsyncRead + Unpin>(
        reader: &mut R,
    ) -> io::Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf);
        if len == 0 {
            return Ok(None);
        }
        let mut body = vec![0u8; len as usize];
        reader.read_exact(&mut body).await?;
        Ok(Some(body))
    }
}

/// Encodes a per-chunk map-presence bitmap per the fixed encoding: a 4-byte
/// little-endian count followed by that many 4-byte little-endian `i32`
/// map indices, in ascending sorted order.
pub fn encode_chunk_bitmap(map_indices: &[i32]) -> Vec<u8> {
    let mut sorted = map_indices.to_vec();
    sorted.sort_unstable();
    let mut out = Vec::with_capacity(4 + sorted.len() * 4);
    out.extend_from_slice(&(sorted.len() as u32).to_le_bytes());
    for idx in sorted {
        out.extend_from_slice(&idx.to_le_bytes());
    }
    out
}

/// Decodes one bitmap written by [`encode_chunk_bitmap`] from the front of
/// `buf`, returning the map indices and the number of bytes consumed.
pub fn decode_chunk_bitmap(buf: &[u8]) -> Result<(Vec<i32>, usize)> {
    if buf.len() < 4 {
        return Err(FramingError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated bitmap count",
        )));
    }
    let count = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let needed = 4 + count * 4;
    if buf.len() < needed {
        return Err(FramingError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated bitmap entries",
        )));
    }
    let mut indices = Vec::with_capacity(count);
    for i in 0..count {
        let off = 4 + i * 4;
        indices.push(i32::from_le_bytes([
            buf[off],
            buf[off + 1],
            buf[off + 2],
            buf[off + 3],
        ]));
    }
    Ok((indices, needed))
}

//! Length-delimited framing for the low-latency transport.
//!
//! Frames are self-describing: a 4-byte big-endian length prefix followed
//! by that many bytes of JSON. There is no precedent in this codebase for a
//! generic framed-codec crate, so the wire format is hand-rolled here
//! rather than layered on one.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{TransportError, TransportResult};

/// Frames larger than this are rejected outright rather than trusted as a
/// length prefix, so a corrupt stream can't trigger an unbounded allocation.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Serializes `value` as JSON and writes it as one length-prefixed frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> TransportResult<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value)?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        TransportError::SendFailed(format!("frame of {} bytes exceeds u32::MAX", payload.len()))
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame and parses it as JSON. Returns `Ok(None)`
/// on a clean EOF with no bytes read (the peer closed the connection).
pub async fn read_frame<R, T>(reader: &mut R) -> TransportResult<Option<T>>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds MAX_FRAME_LEN ({MAX_FRAME_LEN})"),
        )));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    let value = serde_json::from_slice(&payload)?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn frame_round_trips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &json!({"hello": "world"})).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let value: serde_json::Value = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(value, json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn empty_stream_yields_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let value: Option<serde_json::Value> = read_frame(&mut cursor).await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let result: TransportResult<Option<serde_json::Value>> = read_frame(&mut cursor).await;
        assert!(result.is_err());
    }
}

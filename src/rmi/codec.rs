//! Length-prefixed framing for serialized wire objects.
//!
//! Every frame is a 4-byte big-endian byte count followed by the bincode
//! encoding of one object. Frames larger than [`MAX_FRAME_LEN`] are rejected
//! before allocation.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::RmiError;

/// Upper bound on a single frame, generous enough for a chunked file read.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Serializes `value` and writes it as one frame.
pub async fn write_frame<T, W>(writer: &mut W, value: &T) -> Result<(), RmiError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let body = bincode::serialize(value).map_err(|err| RmiError::Codec(err.to_string()))?;
    if body.len() > MAX_FRAME_LEN as usize {
        return Err(RmiError::Codec(format!("{}-byte frame exceeds limit", body.len())));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    WriteBytesExt::write_u32::<BigEndian>(&mut frame, body.len() as u32)
        .map_err(|err| RmiError::Io(err.to_string()))?;
    frame.extend_from_slice(&body);
    writer.write_all(&frame).await.map_err(|err| RmiError::Io(err.to_string()))?;
    writer.flush().await.map_err(|err| RmiError::Io(err.to_string()))?;
    Ok(())
}

/// Reads one frame and deserializes it.
///
/// A clean close before any byte of the frame maps to [`RmiError::NoResponse`].
pub async fn read_frame<T, R>(reader: &mut R) -> Result<T, RmiError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            RmiError::NoResponse
        } else {
            RmiError::Io(err.to_string())
        }
    })?;
    let length = BigEndian::read_u32(&prefix);
    if length > MAX_FRAME_LEN {
        return Err(RmiError::Codec(format!("{length}-byte frame exceeds limit")));
    }
    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body).await.map_err(|err| RmiError::Io(err.to_string()))?;
    bincode::deserialize(&body).map_err(|err| RmiError::Codec(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rmi::message::{MethodSig, Request};

    #[tokio::test]
    async fn frames_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let request = Request {
            sig: MethodSig::new("ping", &["u32"], "u32"),
            args: vec![1, 2, 3],
        };
        write_frame(&mut client, &request).await.unwrap();
        let decoded: Request = read_frame(&mut server).await.unwrap();
        assert_eq!(decoded.sig, request.sig);
        assert_eq!(decoded.args, request.args);
    }

    #[tokio::test]
    async fn closed_stream_reports_no_response() {
        let (client, mut server) = tokio::io::duplex(16);
        drop(client);
        let result: Result<Request, _> = read_frame(&mut server).await;
        assert_eq!(result.unwrap_err(), RmiError::NoResponse);
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let (mut client, mut server) = tokio::io::duplex(16);
        let mut prefix = [0u8; 4];
        BigEndian::write_u32(&mut prefix, MAX_FRAME_LEN + 1);
        tokio::io::AsyncWriteExt::write_all(&mut client, &prefix).await.unwrap();
        let result: Result<Request, _> = read_frame(&mut server).await;
        assert!(matches!(result.unwrap_err(), RmiError::Codec(_)));
    }
}

//! Length-prefixed framing
//!
//! Wire format of a frame:
//!
//! ```text
//! +----------------+---------------------+
//! | LEN (4B, LE)   | PAYLOAD (LEN bytes) |
//! +----------------+---------------------+
//! ```
//!
//! Zero-length payloads are legal. The pure functions here are shared by
//! [`crate::codec::FrameCodec`] and by the direct async helpers used in the
//! transfer handshake, where raw ciphertext follows the frames on the same
//! stream.

use byteorder::{ByteOrder, LittleEndian};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::{ShareError, ShareResult, FRAME_HEADER_LEN, MAX_FRAME_LEN};

/// Encode a payload into a complete frame
pub fn encode_frame(payload: &[u8]) -> ShareResult<Bytes> {
    let header = encode_header(payload.len())?;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_slice(&header);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Try to decode one frame from the front of `buf`
///
/// Returns `Ok(None)` when more bytes are needed. On success the frame's
/// bytes are consumed from `buf`.
pub fn try_decode_frame(buf: &mut BytesMut, max_len: usize) -> ShareResult<Option<Bytes>> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }

    let len = LittleEndian::read_u32(&buf[..FRAME_HEADER_LEN]) as usize;
    if len > max_len {
        return Err(ShareError::FrameTooLarge {
            size: len,
            max: max_len,
        });
    }

    if buf.len() < FRAME_HEADER_LEN + len {
        buf.reserve(FRAME_HEADER_LEN + len - buf.len());
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_LEN);
    Ok(Some(buf.split_to(len).freeze()))
}

fn encode_header(len: usize) -> ShareResult<[u8; FRAME_HEADER_LEN]> {
    if len > MAX_FRAME_LEN {
        return Err(ShareError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut header = [0u8; FRAME_HEADER_LEN];
    LittleEndian::write_u32(&mut header, len as u32);
    Ok(header)
}

/// Write one frame as two writes: the header, then the payload
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> ShareResult<()>
where
    W: AsyncWrite + Unpin,
{
    let header = encode_header(payload.len())?;
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one complete frame
///
/// # Errors
///
/// Fails with [`ShareError::ConnectionClosed`] if the stream ends before the
/// header or the declared payload is complete.
pub async fn read_frame<R>(reader: &mut R) -> ShareResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    read_full(reader, &mut header).await?;

    let len = LittleEndian::read_u32(&header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ShareError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    read_full(reader, &mut payload).await?;
    Ok(payload)
}

/// Fill `buf` completely, looping over short reads
///
/// A zero-byte read before `buf` is full is reported as
/// [`ShareError::ConnectionClosed`].
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> ShareResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ShareError::ConnectionClosed);
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_encode_layout() {
        let frame = encode_frame(b"ACCEPT").unwrap();
        assert_eq!(&frame[..4], &[6, 0, 0, 0]);
        assert_eq!(&frame[4..], b"ACCEPT");
    }

    #[test]
    fn test_zero_length_frame() {
        let frame = encode_frame(&[]).unwrap();
        assert_eq!(frame.as_ref(), &[0, 0, 0, 0]);

        let mut buf = BytesMut::from(&frame[..]);
        let decoded = try_decode_frame(&mut buf, MAX_FRAME_LEN).unwrap().unwrap();
        assert!(decoded.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_input_needs_more() {
        let frame = encode_frame(b"hello world").unwrap();

        let mut buf = BytesMut::from(&frame[..3]);
        assert!(try_decode_frame(&mut buf, MAX_FRAME_LEN).unwrap().is_none());

        let mut buf = BytesMut::from(&frame[..9]);
        assert!(try_decode_frame(&mut buf, MAX_FRAME_LEN).unwrap().is_none());
        assert_eq!(buf.len(), 9);

        buf.extend_from_slice(&frame[9..]);
        let decoded = try_decode_frame(&mut buf, MAX_FRAME_LEN).unwrap().unwrap();
        assert_eq!(decoded.as_ref(), b"hello world");
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(b"one").unwrap());
        buf.extend_from_slice(&encode_frame(b"").unwrap());
        buf.extend_from_slice(&encode_frame(b"three").unwrap());

        let mut out = Vec::new();
        while let Some(frame) = try_decode_frame(&mut buf, MAX_FRAME_LEN).unwrap() {
            out.push(frame);
        }
        assert_eq!(out, vec![&b"one"[..], &b""[..], &b"three"[..]]);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = BytesMut::from(&[0x00, 0x00, 0x00, 0x02][..]);
        assert!(matches!(
            try_decode_frame(&mut buf, MAX_FRAME_LEN),
            Err(ShareError::FrameTooLarge { size: 0x0200_0000, .. })
        ));

        let mut buf = BytesMut::from(&[9, 0, 0, 0][..]);
        assert!(matches!(
            try_decode_frame(&mut buf, 8),
            Err(ShareError::FrameTooLarge { size: 9, max: 8 })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_fragmented() {
        let mut reader = Builder::new()
            .read(&[5, 0])
            .read(&[0, 0, b'h'])
            .read(b"el")
            .read(b"lo")
            .build();
        let payload = read_frame(&mut reader).await.unwrap();
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn test_read_zero_length_frame() {
        let mut reader = Builder::new().read(&[0, 0, 0, 0]).build();
        assert!(read_frame(&mut reader).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_truncated_payload() {
        let mut reader = Builder::new().read(&[10, 0, 0, 0]).read(b"short").build();
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(ShareError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_truncated_header() {
        let mut reader = Builder::new().read(&[1, 0]).build();
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(ShareError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_frame_two_writes() {
        let mut writer = Builder::new().write(&[8, 0, 0, 0]).write(b"ACK_FAIL").build();
        write_frame(&mut writer, b"ACK_FAIL").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_then_read_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let payload: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();

        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            write_frame(&mut a, &payload).await.unwrap();
            write_frame(&mut a, &[]).await.unwrap();
        });

        assert_eq!(read_frame(&mut b).await.unwrap(), expected);
        assert!(read_frame(&mut b).await.unwrap().is_empty());
        writer.await.unwrap();
    }
}

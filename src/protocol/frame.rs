//! Frame encoding and decoding.
//!
//! A frame is an ordered sequence of framelets with a length-prefixed
//! count. Wire layout (all integers little-endian):
//!
//! ```text
//! frame    := count:u16 framelet{count}
//! framelet := type:u16 length:u32 content:byte[length]
//! ```
//!
//! The writer emits exactly this concatenation with no padding or
//! alignment. The reader either yields a complete, well-typed frame or
//! fails with a specific [`ProtocolViolation`]; it never returns a
//! partially populated frame. Short reads are retried internally until
//! the exact byte count arrives or the stream ends.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::framelet::{Framelet, FrameletType, MAX_FRAMELET_LENGTH};
use crate::error::{EpoxyError, ProtocolViolation, Result};

/// Maximum number of framelets in a single frame.
pub const MAX_FRAMELET_COUNT: usize = u16::MAX as usize;

/// An ordered sequence of framelets.
///
/// A frame may be built up empty, but an empty frame is never valid on
/// the wire: [`Frame::encode`] refuses it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    framelets: Vec<Framelet>,
}

impl Frame {
    /// Create an empty frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a frame holding a single framelet.
    pub fn with_framelet(framelet: Framelet) -> Self {
        Self {
            framelets: vec![framelet],
        }
    }

    /// Append a framelet, preserving order.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` when the frame already holds
    /// [`MAX_FRAMELET_COUNT`] framelets.
    pub fn append(&mut self, framelet: Framelet) -> Result<()> {
        if self.framelets.len() >= MAX_FRAMELET_COUNT {
            return Err(EpoxyError::InvalidOperation(format!(
                "frame already holds the maximum of {MAX_FRAMELET_COUNT} framelets"
            )));
        }
        self.framelets.push(framelet);
        Ok(())
    }

    /// The framelets in wire order.
    #[inline]
    pub fn framelets(&self) -> &[Framelet] {
        &self.framelets
    }

    /// The number of framelets.
    #[inline]
    pub fn count(&self) -> usize {
        self.framelets.len()
    }

    /// Whether the frame holds no framelets.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.framelets.is_empty()
    }

    /// Total encoded size in bytes.
    pub fn wire_size(&self) -> usize {
        2 + self
            .framelets
            .iter()
            .map(|f| 2 + 4 + f.len())
            .sum::<usize>()
    }

    /// Serialize the frame to its exact wire bytes.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` if the frame is empty.
    pub fn encode(&self) -> Result<Bytes> {
        if self.framelets.is_empty() {
            return Err(EpoxyError::InvalidOperation(
                "cannot write an empty frame".to_string(),
            ));
        }

        let mut buf = BytesMut::with_capacity(self.wire_size());
        buf.put_u16_le(self.framelets.len() as u16);
        for framelet in &self.framelets {
            buf.put_u16_le(framelet.framelet_type().to_wire());
            buf.put_u32_le(framelet.len() as u32);
            buf.put_slice(framelet.contents());
        }
        Ok(buf.freeze())
    }

    /// Read one frame from the stream.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly at a frame
    /// boundary (no bytes of the next frame read). Any of the following
    /// fails with the named [`ProtocolViolation`]:
    ///
    /// - a framelet count of zero (`ZeroFramelets`)
    /// - a type code outside the enumeration (`UnknownFrameletType`)
    /// - a length outside [1, 2^31 - 1] (`FrameletLengthOutOfRange`)
    /// - end-of-stream before count, type, length, or content completes
    ///   (`UnexpectedEndOfStream`)
    pub async fn read_from<R>(reader: &mut R) -> Result<Option<Frame>>
    where
        R: AsyncRead + Unpin,
    {
        let mut count_buf = [0u8; 2];
        let n = reader.read(&mut count_buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if n < count_buf.len() {
            reader
                .read_exact(&mut count_buf[n..])
                .await
                .map_err(EpoxyError::from_read_error)?;
        }

        let count = u16::from_le_bytes(count_buf);
        if count == 0 {
            return Err(ProtocolViolation::ZeroFramelets.into());
        }

        let mut framelets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut prefix = [0u8; 6];
            reader
                .read_exact(&mut prefix)
                .await
                .map_err(EpoxyError::from_read_error)?;

            let raw_type = u16::from_le_bytes([prefix[0], prefix[1]]);
            let framelet_type = FrameletType::from_wire(raw_type)
                .ok_or(ProtocolViolation::UnknownFrameletType(raw_type))?;

            let length = u32::from_le_bytes([prefix[2], prefix[3], prefix[4], prefix[5]]);
            if length == 0 || length > MAX_FRAMELET_LENGTH {
                return Err(ProtocolViolation::FrameletLengthOutOfRange(length).into());
            }

            let mut contents = vec![0u8; length as usize];
            reader
                .read_exact(&mut contents)
                .await
                .map_err(EpoxyError::from_read_error)?;

            framelets.push(Framelet::new(framelet_type, Bytes::from(contents))?);
        }

        Ok(Some(Frame { framelets }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framelet(ty: FrameletType, contents: &'static [u8]) -> Framelet {
        Framelet::new(ty, Bytes::from_static(contents)).unwrap()
    }

    async fn read_all(bytes: &[u8]) -> Result<Option<Frame>> {
        let mut cursor = bytes;
        Frame::read_from(&mut cursor).await
    }

    #[test]
    fn test_single_framelet_exact_bytes() {
        let frame = Frame::with_framelet(framelet(FrameletType::EpoxyConfig, b"bond"));
        let encoded = frame.encode().unwrap();

        let expected: &[u8] = &[
            0x01, 0x00, // count
            0x43, 0x47, // EpoxyConfig, little-endian
            0x04, 0x00, 0x00, 0x00, // length
            0x62, 0x6F, 0x6E, 0x64, // "bond"
        ];
        assert_eq!(&encoded[..], expected);
    }

    #[test]
    fn test_empty_frame_refused() {
        let frame = Frame::new();
        assert!(matches!(
            frame.encode(),
            Err(EpoxyError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_append_past_capacity_fails() {
        let mut frame = Frame::new();
        for _ in 0..MAX_FRAMELET_COUNT {
            frame
                .append(framelet(FrameletType::LayerData, b"x"))
                .unwrap();
        }
        assert_eq!(frame.count(), MAX_FRAMELET_COUNT);
        let result = frame.append(framelet(FrameletType::LayerData, b"x"));
        assert!(matches!(result, Err(EpoxyError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_order_and_bytes() {
        let mut frame = Frame::new();
        frame
            .append(framelet(FrameletType::EpoxyConfig, b"bond"))
            .unwrap();
        frame
            .append(framelet(FrameletType::LayerData, b"bond"))
            .unwrap();
        frame
            .append(framelet(FrameletType::EpoxyConfig, b"bond"))
            .unwrap();

        let encoded = frame.encode().unwrap();
        let decoded = read_all(&encoded).await.unwrap().unwrap();

        assert_eq!(decoded, frame);
        assert_eq!(decoded.count(), 3);
        for (a, b) in decoded.framelets().iter().zip(frame.framelets()) {
            assert_eq!(a.framelet_type(), b.framelet_type());
            assert_eq!(a.contents(), b.contents());
        }
    }

    #[tokio::test]
    async fn test_clean_eof_at_boundary_is_none() {
        assert!(read_all(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_framelets_rejected() {
        let result = read_all(&[0x00, 0x00]).await;
        assert!(matches!(
            result,
            Err(EpoxyError::Protocol(ProtocolViolation::ZeroFramelets))
        ));
    }

    #[tokio::test]
    async fn test_unknown_type_rejected() {
        let bytes = [0x01, 0x00, 0x34, 0x12, 0x01, 0x00, 0x00, 0x00, 0xAA];
        let result = read_all(&bytes).await;
        assert!(matches!(
            result,
            Err(EpoxyError::Protocol(ProtocolViolation::UnknownFrameletType(
                0x1234
            )))
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        // EpoxyConfig framelet claiming 2^31 bytes.
        let bytes = [0x01, 0x00, 0x43, 0x47, 0x00, 0x00, 0x00, 0x80];
        let result = read_all(&bytes).await;
        assert!(matches!(
            result,
            Err(EpoxyError::Protocol(
                ProtocolViolation::FrameletLengthOutOfRange(0x8000_0000)
            ))
        ));
    }

    #[tokio::test]
    async fn test_zero_length_rejected() {
        let bytes = [0x01, 0x00, 0x43, 0x47, 0x00, 0x00, 0x00, 0x00];
        let result = read_all(&bytes).await;
        assert!(matches!(
            result,
            Err(EpoxyError::Protocol(
                ProtocolViolation::FrameletLengthOutOfRange(0)
            ))
        ));
    }

    #[tokio::test]
    async fn test_truncation_is_protocol_error() {
        let frame = Frame::with_framelet(framelet(FrameletType::PayloadData, b"payload"));
        let encoded = frame.encode().unwrap();

        // Truncate mid-count, mid-type, mid-length, and mid-content.
        for cut in [1, 3, 5, encoded.len() - 1] {
            let result = read_all(&encoded[..cut]).await;
            assert!(
                matches!(
                    result,
                    Err(EpoxyError::Protocol(
                        ProtocolViolation::UnexpectedEndOfStream
                    ))
                ),
                "cut at {cut} did not fail as end-of-stream"
            );
        }
    }

    #[tokio::test]
    async fn test_reads_one_frame_leaving_the_rest() {
        let first = Frame::with_framelet(framelet(FrameletType::EpoxyHeaders, b"h"));
        let second = Frame::with_framelet(framelet(FrameletType::PayloadData, b"p"));

        let mut bytes = first.encode().unwrap().to_vec();
        bytes.extend_from_slice(&second.encode().unwrap());

        let mut cursor = &bytes[..];
        let a = Frame::read_from(&mut cursor).await.unwrap().unwrap();
        let b = Frame::read_from(&mut cursor).await.unwrap().unwrap();
        let end = Frame::read_from(&mut cursor).await.unwrap();

        assert_eq!(a, first);
        assert_eq!(b, second);
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_read_from_duplex_in_chunks() {
        let (mut tx, mut rx) = tokio::io::duplex(16);

        let frame = Frame::with_framelet(framelet(
            FrameletType::PayloadData,
            b"a somewhat longer payload that spans several small writes",
        ));
        let encoded = frame.encode().unwrap();

        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for chunk in encoded.chunks(7) {
                tx.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let decoded = Frame::read_from(&mut rx).await.unwrap().unwrap();
        assert_eq!(decoded, frame);
        writer.await.unwrap();
    }
}

//! Ferry wire protocol implementation.
//!
//! Ferry peers exchange length-prefixed binary frames over a single TCP
//! stream.
//!
//! ## Frame Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Ferry Frame                      │
//! ├──────────────┬────────────┬──────────────────────────┤
//! │    Length    │   Header   │         Fields           │
//! │   4 bytes    │   1 byte   │    (header-specific)     │
//! └──────────────┴────────────┴──────────────────────────┘
//! ```
//!
//! - Length: byte count of the payload (header + fields), big-endian,
//!   excluding itself
//! - Header: frame discriminator byte
//! - Fields: explicit-width values: 4-byte ids/sizes, 8-byte lengths and
//!   offsets, 4-byte length-prefixed UTF-8 text, raw bytes for chunk data
//!
//! All integers are big-endian on both ends. The length prefix always
//! exactly matches the serialized payload; reassembling frames from TCP
//! fragments is the receiver's job and is handled by [`read_frame`].
//!
//! | Header | Byte | Fields |
//! |--------|------|--------|
//! | Queue  | 0x01 | id:u32, name:string, length:u64 |
//! | Start  | 0x02 | id:u32 |
//! | Stop   | 0x03 | id:u32 |
//! | Pause  | 0x04 | id:u32 |
//! | Chunk  | 0x05 | id:u32, offset:u64, size:u32, data:bytes |

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// Size of the frame length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum accepted frame payload size (64 KiB).
///
/// Chunk frames dominate traffic and stay at or under 8 KiB; anything far
/// beyond that is a sign of a corrupt or hostile stream.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Fixed byte cost of a chunk frame payload before its data:
/// header (1) + id (4) + offset (8) + size (4).
pub const CHUNK_OVERHEAD: usize = 17;

/// Largest chunk data size that still fits in one frame.
pub const MAX_CHUNK_SIZE: usize = MAX_FRAME_SIZE - CHUNK_OVERHEAD;

/// Frame headers in the Ferry protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Header {
    /// Announce a file available to send
    Queue = 0x01,
    /// Receiver ready; sender may begin streaming chunks
    Start = 0x02,
    /// Cancel a transfer; both sides discard state
    Stop = 0x03,
    /// Advisory pause/resume toggle
    Pause = 0x04,
    /// One offset-addressed block of file content
    Chunk = 0x05,
}

impl Header {
    /// Parse a header from a byte.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Queue),
            0x02 => Some(Self::Start),
            0x03 => Some(Self::Stop),
            0x04 => Some(Self::Pause),
            0x05 => Some(Self::Chunk),
            _ => None,
        }
    }
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Announce a file available to send.
    Queue {
        /// Transfer id chosen by the sending side
        id: u32,
        /// Display/save name of the file
        filename: String,
        /// Total file size in bytes
        length: u64,
    },
    /// Receiver is ready; the sender may begin streaming chunks.
    Start {
        /// Transfer id
        id: u32,
    },
    /// Cancel a transfer.
    Stop {
        /// Transfer id
        id: u32,
    },
    /// Toggle the pause state of a transfer.
    Pause {
        /// Transfer id
        id: u32,
    },
    /// One block of file content, addressed by its byte offset.
    Chunk {
        /// Transfer id
        id: u32,
        /// Byte position of this block within the file
        offset: u64,
        /// Block content
        data: Vec<u8>,
    },
}

impl Frame {
    /// The header byte for this frame.
    pub const fn header(&self) -> Header {
        match self {
            Self::Queue { .. } => Header::Queue,
            Self::Start { .. } => Header::Start,
            Self::Stop { .. } => Header::Stop,
            Self::Pause { .. } => Header::Pause,
            Self::Chunk { .. } => Header::Chunk,
        }
    }

    /// Encode the frame payload (header byte + fields, without the length
    /// prefix).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Queue {
                id,
                filename,
                length,
            } => {
                let name = filename.as_bytes();
                let mut buf = Vec::with_capacity(17 + name.len());
                buf.push(Header::Queue as u8);
                buf.extend_from_slice(&id.to_be_bytes());
                buf.extend_from_slice(&(name.len() as u32).to_be_bytes());
                buf.extend_from_slice(name);
                buf.extend_from_slice(&length.to_be_bytes());
                buf
            }
            Self::Start { id } => control_payload(Header::Start, *id),
            Self::Stop { id } => control_payload(Header::Stop, *id),
            Self::Pause { id } => control_payload(Header::Pause, *id),
            Self::Chunk { id, offset, data } => {
                let mut buf = Vec::with_capacity(CHUNK_OVERHEAD + data.len());
                buf.push(Header::Chunk as u8);
                buf.extend_from_slice(&id.to_be_bytes());
                buf.extend_from_slice(&offset.to_be_bytes());
                buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
                buf.extend_from_slice(data);
                buf
            }
        }
    }

    /// Decode a frame from its payload bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the header byte is unknown, a field runs past the
    /// payload, or trailing bytes remain after the last field.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = FieldReader::new(payload);

        let byte = reader.read_u8()?;
        let header = Header::from_byte(byte).ok_or(Error::UnknownHeader(byte))?;

        let frame = match header {
            Header::Queue => {
                let id = reader.read_u32()?;
                let filename = reader.read_string()?;
                let length = reader.read_u64()?;
                Self::Queue {
                    id,
                    filename,
                    length,
                }
            }
            Header::Start => Self::Start {
                id: reader.read_u32()?,
            },
            Header::Stop => Self::Stop {
                id: reader.read_u32()?,
            },
            Header::Pause => Self::Pause {
                id: reader.read_u32()?,
            },
            Header::Chunk => {
                let id = reader.read_u32()?;
                let offset = reader.read_u64()?;
                let size = reader.read_u32()? as usize;
                let data = reader.read_bytes(size)?.to_vec();
                Self::Chunk { id, offset, data }
            }
        };

        reader.finish()?;
        Ok(frame)
    }
}

fn control_payload(header: Header, id: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5);
    buf.push(header as u8);
    buf.extend_from_slice(&id.to_be_bytes());
    buf
}

/// Sequential reader over a frame payload with explicit-width fields.
struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&e| e <= self.buf.len());
        let Some(end) = end else {
            return Err(Error::Protocol(format!(
                "field of {len} bytes runs past end of {}-byte payload",
                self.buf.len()
            )));
        };
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Protocol("string field is not valid UTF-8".to_string()))
    }

    /// Rejects payloads with bytes left over after the last field.
    fn finish(&self) -> Result<()> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "{} trailing bytes after frame fields",
                self.buf.len() - self.pos
            )))
        }
    }
}

/// Read one complete frame from a stream.
///
/// Reads the 4-byte length prefix, then exactly that many payload bytes,
/// issuing as many reads as the transport requires. TCP may deliver a frame
/// in arbitrarily small fragments; this function does not return until the
/// full frame has been collected or the stream fails.
///
/// # Errors
///
/// Returns an error if reading fails or the frame is invalid.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(Error::Protocol("empty frame payload".to_string()));
    }
    if len > MAX_FRAME_SIZE {
        return Err(Error::PayloadTooLarge {
            size: len,
            limit: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Frame::decode(&payload)
}

/// Write one complete frame to a stream.
///
/// Writes the 4-byte length prefix followed by the payload, then flushes.
/// Callers are responsible for serializing concurrent writers; the frame
/// itself is emitted as one contiguous prefix + payload sequence.
///
/// # Errors
///
/// Returns an error if writing fails.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let payload = frame.encode();
    writer
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: &Frame) -> Frame {
        let payload = frame.encode();
        Frame::decode(&payload).expect("decode")
    }

    #[test]
    fn test_queue_roundtrip() {
        let frame = Frame::Queue {
            id: 0xDEAD_BEEF,
            filename: "report.pdf".to_string(),
            length: 4_294_967_296,
        };
        assert_eq!(roundtrip(&frame), frame);
    }

    #[test]
    fn test_control_roundtrips() {
        for frame in [
            Frame::Start { id: 1 },
            Frame::Stop { id: u32::MAX },
            Frame::Pause { id: 42 },
        ] {
            assert_eq!(roundtrip(&frame), frame);
        }
    }

    #[test]
    fn test_chunk_roundtrip() {
        let frame = Frame::Chunk {
            id: 7,
            offset: 16_350,
            data: vec![0xAB; 3650],
        };
        assert_eq!(roundtrip(&frame), frame);
    }

    #[test]
    fn test_chunk_payload_fits_eight_kib() {
        let frame = Frame::Chunk {
            id: 1,
            offset: 0,
            data: vec![0u8; crate::DEFAULT_CHUNK_SIZE],
        };
        assert_eq!(frame.encode().len(), 8192);
    }

    #[test]
    fn test_empty_filename_roundtrip() {
        let frame = Frame::Queue {
            id: 3,
            filename: String::new(),
            length: 0,
        };
        assert_eq!(roundtrip(&frame), frame);
    }

    #[test]
    fn test_unknown_header_rejected() {
        let payload = [0xABu8, 0, 0, 0, 1];
        match Frame::decode(&payload) {
            Err(Error::UnknownHeader(0xAB)) => {}
            other => panic!("expected UnknownHeader, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_chunk_rejected() {
        // Declares 100 data bytes but carries only 5.
        let frame = Frame::Chunk {
            id: 1,
            offset: 0,
            data: vec![1, 2, 3, 4, 5],
        };
        let mut payload = frame.encode();
        payload[13..17].copy_from_slice(&100u32.to_be_bytes());
        assert!(Frame::decode(&payload).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut payload = Frame::Start { id: 9 }.encode();
        payload.push(0);
        assert!(Frame::decode(&payload).is_err());
    }

    #[test]
    fn test_invalid_utf8_filename_rejected() {
        let mut payload = vec![Header::Queue as u8];
        payload.extend_from_slice(&1u32.to_be_bytes());
        payload.extend_from_slice(&2u32.to_be_bytes());
        payload.extend_from_slice(&[0xFF, 0xFE]);
        payload.extend_from_slice(&10u64.to_be_bytes());
        assert!(Frame::decode(&payload).is_err());
    }

    #[tokio::test]
    async fn test_read_write_frame() {
        let mut buffer = Vec::new();

        let frame = Frame::Queue {
            id: 11,
            filename: "notes.txt".to_string(),
            length: 512,
        };
        write_frame(&mut buffer, &frame).await.expect("write frame");

        let mut cursor = std::io::Cursor::new(buffer);
        let decoded = read_frame(&mut cursor).await.expect("read frame");
        assert_eq!(decoded, frame);
    }

    #[tokio::test]
    async fn test_length_prefix_matches_payload() {
        let mut buffer = Vec::new();
        let frame = Frame::Chunk {
            id: 2,
            offset: 8175,
            data: vec![7u8; 64],
        };
        write_frame(&mut buffer, &frame).await.expect("write frame");

        let declared = u32::from_be_bytes(buffer[..4].try_into().unwrap()) as usize;
        assert_eq!(declared, buffer.len() - LENGTH_PREFIX_SIZE);
        assert_eq!(declared, frame.encode().len());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&((MAX_FRAME_SIZE + 1) as u32).to_be_bytes());
        buffer.extend_from_slice(&[0u8; 16]);

        let mut cursor = std::io::Cursor::new(buffer);
        match read_frame(&mut cursor).await {
            Err(Error::PayloadTooLarge { .. }) => {}
            other => panic!("expected PayloadTooLarge, got {other:?}"),
        }
    }

    /// Reader that delivers one byte per poll, simulating worst-case TCP
    /// fragmentation.
    struct TrickleReader {
        data: Vec<u8>,
        pos: usize,
    }

    impl tokio::io::AsyncRead for TrickleReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if self.pos < self.data.len() {
                let byte = self.data[self.pos];
                buf.put_slice(&[byte]);
                self.pos += 1;
            }
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_one_byte_at_a_time_assembly() {
        let frames = [
            Frame::Queue {
                id: 21,
                filename: "fragmented.bin".to_string(),
                length: 9000,
            },
            Frame::Chunk {
                id: 21,
                offset: 0,
                data: vec![0x5A; 300],
            },
            Frame::Stop { id: 21 },
        ];

        let mut data = Vec::new();
        for frame in &frames {
            write_frame(&mut data, frame).await.expect("write frame");
        }

        let mut reader = TrickleReader { data, pos: 0 };
        for frame in &frames {
            let decoded = read_frame(&mut reader).await.expect("read frame");
            assert_eq!(&decoded, frame);
        }
    }
}

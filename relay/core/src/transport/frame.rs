//! Frame Codec
//!
//! Byte framing for stream transports (Unix sockets). Message-oriented
//! transports such as WebSocket carry the JSON payload directly and skip
//! this layer.
//!
//! # Frame Format
//!
//! ```text
//! +----------------+----------------+------------------------------------------+
//! | Length (4)     | Checksum (4)   | JSON Payload (variable)                  |
//! | big-endian u32 | CRC32 of JSON  | OutboundFrame or InboundFrame            |
//! +----------------+----------------+------------------------------------------+
//! ```
//!
//! Length covers the payload only. Frames larger than [`MAX_FRAME_SIZE`] are
//! rejected on both sides before any allocation.

use serde::{de::DeserializeOwned, Serialize};

use super::TransportError;

/// Maximum payload size (10 MB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Length + checksum
const HEADER_SIZE: usize = 8;

/// Consumed bytes are compacted away once they pass this mark
const COMPACT_THRESHOLD: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FrameHeader {
    len: usize,
    checksum: u32,
}

impl FrameHeader {
    fn parse(bytes: &[u8]) -> Option<Self> {
        let header: &[u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *header;
        Some(Self {
            len: u32::from_be_bytes([l0, l1, l2, l3]) as usize,
            checksum: u32::from_be_bytes([c0, c1, c2, c3]),
        })
    }
}

/// Serialize a frame into `[len][crc32][json]`
///
/// # Errors
///
/// `SerializationError` when JSON encoding fails or the payload is too large.
pub fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, TransportError> {
    let payload =
        serde_json::to_vec(frame).map_err(|e| TransportError::SerializationError(e.to_string()))?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::SerializationError(format!(
            "frame of {} bytes exceeds maximum {MAX_FRAME_SIZE}",
            payload.len()
        )));
    }

    let len = u32::try_from(payload.len())
        .map_err(|e| TransportError::SerializationError(e.to_string()))?;

    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Incremental decoder fed from a byte stream
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    consumed: usize,
}

impl FrameDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the transport
    pub fn push(&mut self, data: &[u8]) {
        if self.consumed >= COMPACT_THRESHOLD && self.consumed * 2 > self.buffer.len() {
            self.buffer.drain(..self.consumed);
            self.consumed = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.consumed
    }

    /// Decode the next complete frame
    ///
    /// `Ok(None)` means more bytes are needed. A frame that passes its
    /// checksum is always consumed; if its payload does not decode the
    /// error is `UndecodableFrame` and decoding can continue. Any other
    /// error leaves the buffer untouched and framing is lost.
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        let unread = &self.buffer[self.consumed..];
        let Some(header) = FrameHeader::parse(unread) else {
            return Ok(None);
        };

        if header.len > MAX_FRAME_SIZE {
            return Err(TransportError::SerializationError(format!(
                "frame of {} bytes exceeds maximum {MAX_FRAME_SIZE}",
                header.len
            )));
        }

        let Some(payload) = unread.get(HEADER_SIZE..HEADER_SIZE + header.len) else {
            return Ok(None);
        };

        let actual = crc32fast::hash(payload);
        if actual != header.checksum {
            return Err(TransportError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }

        let decoded = serde_json::from_slice(payload);
        self.consumed += HEADER_SIZE + header.len;

        decoded
            .map(Some)
            .map_err(|e| TransportError::UndecodableFrame(e.to_string()))
    }
}

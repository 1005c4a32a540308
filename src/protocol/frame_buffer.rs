//! Frame buffer for accumulating partial reads.
//!
//! Byte-stream transports carry frames as a 4-byte big-endian length prefix
//! followed by the codec-encoded frame body:
//!
//! ```text
//! ┌──────────────┬──────────────────────────┐
//! │ Length       │ Body (JSON or MsgPack)   │
//! │ 4 bytes BE   │ Length bytes             │
//! └──────────────┴──────────────────────────┘
//! ```
//!
//! Uses `bytes::BytesMut` for buffer management and a two-state machine for
//! fragmented input:
//! - `WaitingForLength`: need at least 4 bytes
//! - `WaitingForBody`: length parsed, need N more body bytes
//!
//! # Example
//!
//! ```
//! use procwire_rpc::protocol::{encode_length_prefix, FrameBuffer};
//!
//! let mut wire = encode_length_prefix(5).to_vec();
//! wire.extend_from_slice(b"hello");
//!
//! let mut buffer = FrameBuffer::new();
//! assert!(buffer.push(&wire[..3]).unwrap().is_empty());
//!
//! let bodies = buffer.push(&wire[3..]).unwrap();
//! assert_eq!(&bodies[0][..], b"hello");
//! ```

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{ProcwireError, Result};

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame body size (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Encode a body length as the 4-byte big-endian prefix.
#[inline]
pub fn encode_length_prefix(len: u32) -> [u8; LENGTH_PREFIX_SIZE] {
    len.to_be_bytes()
}

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForLength,
    WaitingForBody { remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frame bodies.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_frame_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 64 MiB.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom max frame size.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForLength,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frame bodies.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns error if a declared length exceeds `max_frame_size`. The
    /// stream is unusable after that; callers should drop the connection.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut bodies = Vec::new();
        while let Some(body) = self.try_extract_one()? {
            bodies.push(body);
        }

        Ok(bodies)
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    if self.buffer.len() < LENGTH_PREFIX_SIZE {
                        return Ok(None);
                    }

                    let len = self.buffer.get_u32();
                    if len > self.max_frame_size {
                        return Err(ProcwireError::Protocol(format!(
                            "Frame size {} exceeds maximum {}",
                            len, self.max_frame_size
                        )));
                    }

                    self.state = State::WaitingForBody { remaining: len };
                }

                State::WaitingForBody { remaining } => {
                    let remaining = remaining as usize;
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let body = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForLength;
                    return Ok(Some(body));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Check if a body is partially received.
    pub fn is_mid_frame(&self) -> bool {
        matches!(self.state, State::WaitingForBody { .. }) || !self.buffer.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(body: &[u8]) -> Vec<u8> {
        let mut out = encode_length_prefix(body.len() as u32).to_vec();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_single_frame() {
        let mut buffer = FrameBuffer::new();
        let bodies = buffer.push(&wire(b"{\"kind\":\"end\"}")).unwrap();

        assert_eq!(bodies.len(), 1);
        assert_eq!(&bodies[0][..], b"{\"kind\":\"end\"}");
        assert!(buffer.is_empty());
        assert!(!buffer.is_mid_frame());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut data = wire(b"one");
        data.extend(wire(b"two"));
        data.extend(wire(b"three"));

        let mut buffer = FrameBuffer::new();
        let bodies = buffer.push(&data).unwrap();

        let bodies: Vec<&[u8]> = bodies.iter().map(|b| &b[..]).collect();
        assert_eq!(bodies, vec![&b"one"[..], b"two", b"three"]);
    }

    #[test]
    fn test_fragmented_byte_by_byte() {
        let data = wire(b"fragmented body");
        let mut buffer = FrameBuffer::new();

        let mut out = Vec::new();
        for byte in &data {
            out.extend(buffer.push(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], b"fragmented body");
    }

    #[test]
    fn test_partial_body_kept() {
        let data = wire(b"abcdef");
        let mut buffer = FrameBuffer::new();

        assert!(buffer.push(&data[..6]).unwrap().is_empty());
        assert!(buffer.is_mid_frame());

        let bodies = buffer.push(&data[6..]).unwrap();
        assert_eq!(&bodies[0][..], b"abcdef");
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buffer = FrameBuffer::with_max_frame_size(8);
        let result = buffer.push(&wire(b"definitely too long"));

        assert!(matches!(result, Err(ProcwireError::Protocol(_))));
    }

    #[test]
    fn test_empty_body() {
        let mut buffer = FrameBuffer::new();
        let bodies = buffer.push(&wire(b"")).unwrap();

        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].is_empty());
    }
}

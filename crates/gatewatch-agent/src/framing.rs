//! Message framing over the endpoint transport.
//!
//! Peers deliver one serialized message per frame. The transport carries a
//! 4-byte little-endian length prefix so that the layers above see
//! message-mode semantics: reads are issued in [`CHUNK_SIZE`] steps, the
//! reassembly buffer grows by one chunk at a time, and a complete payload
//! is surfaced only when the final byte of the message has arrived.

use crate::error::AgentError;
use gatewatch_proto::MAX_MESSAGE_SIZE;
use std::io;

/// Size of one transport read, and the step by which the reassembly buffer
/// grows while a large message is being received.
pub(crate) const CHUNK_SIZE: usize = 4096;

const LEN_PREFIX: usize = 4;

/// Incrementally reassembles one length-prefixed message from chunk reads.
///
/// Usage cycle: read transport bytes into [`spare`](Self::spare), then hand
/// the byte count to [`advance`](Self::advance); a `Some` return is a
/// complete message payload and resets the reader for the next message.
pub(crate) struct FrameReader {
    header: [u8; LEN_PREFIX],
    header_len: usize,
    expected: usize,
    buf: Vec<u8>,
    filled: usize,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            header: [0; LEN_PREFIX],
            header_len: 0,
            expected: 0,
            buf: Vec::new(),
            filled: 0,
        }
    }

    /// The slice the next transport read should fill.
    ///
    /// Never extends past the end of the current message, so bytes of a
    /// following message are left on the transport.
    pub fn spare(&mut self) -> &mut [u8] {
        if self.header_len < LEN_PREFIX {
            return &mut self.header[self.header_len..];
        }
        if self.filled == self.buf.len() && self.filled < self.expected {
            let grow = (self.expected - self.filled).min(CHUNK_SIZE);
            self.buf.resize(self.filled + grow, 0);
        }
        &mut self.buf[self.filled..]
    }

    /// Record `n` bytes just read into [`spare`](Self::spare).
    ///
    /// Returns the assembled payload once the whole message has arrived.
    ///
    /// # Errors
    /// [`AgentError::MalformedMessage`] for an empty message or one larger
    /// than [`MAX_MESSAGE_SIZE`].
    pub fn advance(&mut self, n: usize) -> Result<Option<Vec<u8>>, AgentError> {
        if self.header_len < LEN_PREFIX {
            self.header_len += n;
            debug_assert!(self.header_len <= LEN_PREFIX);
            if self.header_len == LEN_PREFIX {
                let expected = u32::from_le_bytes(self.header) as usize;
                if expected == 0 || expected > MAX_MESSAGE_SIZE {
                    return Err(AgentError::MalformedMessage);
                }
                self.expected = expected;
                self.buf.resize(expected.min(CHUNK_SIZE), 0);
                self.filled = 0;
            }
            return Ok(None);
        }

        self.filled += n;
        debug_assert!(self.filled <= self.expected);
        if self.filled < self.expected {
            return Ok(None);
        }

        let mut payload = std::mem::take(&mut self.buf);
        payload.truncate(self.filled);
        self.header_len = 0;
        self.expected = 0;
        self.filled = 0;
        Ok(Some(payload))
    }
}

/// Frame a payload for the wire: 4-byte little-endian length + bytes.
///
/// # Errors
/// Returns an error if the payload exceeds [`MAX_MESSAGE_SIZE`].
pub(crate) fn encode_frame(payload: &[u8]) -> io::Result<Vec<u8>> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {} bytes", payload.len()),
        ));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "message too large"))?;

    let mut frame = Vec::with_capacity(LEN_PREFIX + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `bytes` to the reader in fragments of at most `step`, returning
    /// every completed message.
    fn feed(reader: &mut FrameReader, bytes: &[u8], step: usize) -> Vec<Vec<u8>> {
        let mut messages = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let spare = reader.spare();
            let n = spare.len().min(step).min(bytes.len() - offset);
            spare[..n].copy_from_slice(&bytes[offset..offset + n]);
            offset += n;
            if let Some(payload) = reader.advance(n).unwrap() {
                messages.push(payload);
            }
        }
        messages
    }

    #[test]
    fn test_roundtrip_small() {
        let frame = encode_frame(b"hello").unwrap();
        let mut reader = FrameReader::new();
        let messages = feed(&mut reader, &frame, frame.len());
        assert_eq!(messages, vec![b"hello".to_vec()]);
    }

    #[test]
    fn test_roundtrip_byte_at_a_time() {
        let payload: Vec<u8> = (0..=255).collect();
        let frame = encode_frame(&payload).unwrap();
        let mut reader = FrameReader::new();
        let messages = feed(&mut reader, &frame, 1);
        assert_eq!(messages, vec![payload]);
    }

    #[test]
    fn test_roundtrip_larger_than_chunk() {
        // Forces the buffer to grow by CHUNK_SIZE twice.
        let payload = vec![0xabu8; CHUNK_SIZE * 2 + 100];
        let frame = encode_frame(&payload).unwrap();
        let mut reader = FrameReader::new();
        let messages = feed(&mut reader, &frame, CHUNK_SIZE);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], payload);
    }

    #[test]
    fn test_buffer_grows_by_chunk() {
        let payload = vec![1u8; CHUNK_SIZE + 1];
        let frame = encode_frame(&payload).unwrap();
        let mut reader = FrameReader::new();

        // Header first.
        let spare = reader.spare();
        assert_eq!(spare.len(), 4);
        spare.copy_from_slice(&frame[..4]);
        assert!(reader.advance(4).unwrap().is_none());

        // First read window is exactly one chunk.
        assert_eq!(reader.spare().len(), CHUNK_SIZE);
        let spare = reader.spare();
        spare.copy_from_slice(&frame[4..4 + CHUNK_SIZE]);
        assert!(reader.advance(CHUNK_SIZE).unwrap().is_none());

        // Growth is clamped to what the message still needs.
        assert_eq!(reader.spare().len(), 1);
        reader.spare()[0] = frame[4 + CHUNK_SIZE];
        let message = reader.advance(1).unwrap().unwrap();
        assert_eq!(message, payload);
    }

    #[test]
    fn test_two_messages_back_to_back() {
        let mut bytes = encode_frame(b"first").unwrap();
        bytes.extend_from_slice(&encode_frame(b"second").unwrap());
        let mut reader = FrameReader::new();
        let messages = feed(&mut reader, &bytes, 3);
        assert_eq!(messages, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn test_empty_message_rejected() {
        let mut reader = FrameReader::new();
        reader.spare()[..4].copy_from_slice(&0u32.to_le_bytes());
        let err = reader.advance(4).unwrap_err();
        assert!(matches!(err, AgentError::MalformedMessage));
    }

    #[test]
    fn test_oversize_message_rejected() {
        let mut reader = FrameReader::new();
        let len = u32::try_from(MAX_MESSAGE_SIZE + 1).unwrap();
        reader.spare()[..4].copy_from_slice(&len.to_le_bytes());
        let err = reader.advance(4).unwrap_err();
        assert!(matches!(err, AgentError::MalformedMessage));
    }

    #[test]
    fn test_encode_oversize_rejected() {
        let payload = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert!(encode_frame(&payload).is_err());
    }
}

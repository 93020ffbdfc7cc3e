//! Length-prefixed CBOR framing for client/server messages.
//!
//! Wire format: `[4-byte big-endian length][CBOR payload]`

use crate::error::{VcError, VcResult};
use std::io::Cursor;

/// Largest payload a peer may announce (4 MiB). A replay of a full buffer
/// of PTY chunks stays well below this.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Encode a serializable value into a length-prefixed CBOR frame.
pub fn frame_encode<T: serde::Serialize>(value: &T) -> VcResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)?;

    let len = u32::try_from(payload.len())
        .map_err(|_| VcError::Codec(format!("frame too large: {} bytes", payload.len())))?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend(payload);
    Ok(frame)
}

/// Decode a CBOR payload (without length prefix) into a typed value.
pub fn cbor_decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> VcResult<T> {
    let cursor = Cursor::new(data);
    let value: T = ciborium::from_reader(cursor)?;
    Ok(value)
}

/// Streaming frame decoder: accumulates bytes and yields complete messages.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed bytes into the decoder and return all complete CBOR-decoded messages.
    ///
    /// A frame announcing more than [`MAX_FRAME_LEN`] bytes is rejected and
    /// the decoder is reset.
    pub fn feed<T: serde::de::DeserializeOwned>(&mut self, data: &[u8]) -> VcResult<Vec<T>> {
        self.buffer.extend_from_slice(data);
        let mut messages = Vec::new();

        while self.buffer.len() >= 4 {
            let len =
                u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                    as usize;

            if len > MAX_FRAME_LEN {
                self.buffer.clear();
                return Err(VcError::InvalidMessage(format!(
                    "frame too large: {len} bytes (max {MAX_FRAME_LEN})"
                )));
            }

            if self.buffer.len() < 4 + len {
                break;
            }

            let frame: Vec<u8> = self.buffer.drain(..4 + len).skip(4).collect();
            messages.push(cbor_decode(&frame)?);
        }

        Ok(messages)
    }

    /// Number of bytes remaining in the internal buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ServerMessage;

    #[test]
    fn split_frame_is_reassembled() {
        let msg = ServerMessage::Output {
            session_id: "s1".into(),
            data: b"hello\r\n".to_vec(),
        };
        let frame = frame_encode(&msg).unwrap();
        let (head, tail) = frame.split_at(3);

        let mut decoder = FrameDecoder::new();
        let first: Vec<ServerMessage> = decoder.feed(head).unwrap();
        assert!(first.is_empty());
        assert_eq!(decoder.pending(), 3);

        let second: Vec<ServerMessage> = decoder.feed(tail).unwrap();
        assert_eq!(second, vec![msg]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn two_frames_in_one_feed() {
        let a = ServerMessage::Detached {
            session_id: "a".into(),
            exit_code: 0,
        };
        let b = ServerMessage::Exit {
            session_id: "a".into(),
            exit_code: 1,
        };
        let mut bytes = frame_encode(&a).unwrap();
        bytes.extend(frame_encode(&b).unwrap());

        let mut decoder = FrameDecoder::new();
        let decoded: Vec<ServerMessage> = decoder.feed(&bytes).unwrap();
        assert_eq!(decoded, vec![a, b]);
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut decoder = FrameDecoder::new();
        let len = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        let result: VcResult<Vec<ServerMessage>> = decoder.feed(&len);
        assert!(matches!(result, Err(VcError::InvalidMessage(_))));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn undecodable_frame_is_consumed() {
        let mut decoder = FrameDecoder::new();
        let result: VcResult<Vec<ServerMessage>> = decoder.feed(&[0, 0, 0, 1, 0xff]);
        assert!(result.is_err());
        assert_eq!(decoder.pending(), 0);

        let msg = ServerMessage::Sessions { sessions: vec![] };
        let decoded: Vec<ServerMessage> = decoder.feed(&frame_encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, vec![msg]);
    }
}

//! Frame codec for labnet connections.
//!
//! A frame is a big-endian `u32` byte count followed by that many bytes of
//! JSON encoding one [`Message`]:
//!
//! ```text
//! [len: u32 BE][payload: len bytes of JSON]
//! ```

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::Message;

/// Largest accepted payload (16 MB), enough for long scope traces
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
enum DecodeState {
    #[default]
    Header,
    Payload(usize),
}

/// Encodes and decodes [`Message`] frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    state: DecodeState,
}

impl FrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read_header(src: &mut BytesMut) -> Result<Option<usize>, CodecError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = src.get_u32() as usize;
        if len > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(len));
        }
        Ok(Some(len))
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        let len = match self.state {
            DecodeState::Payload(len) => len,
            DecodeState::Header => match Self::read_header(src)? {
                Some(len) => {
                    self.state = DecodeState::Payload(len);
                    len
                }
                None => return Ok(None),
            },
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        // Reset before parsing so the codec is reusable after a bad payload
        self.state = DecodeState::Header;
        let payload = src.split_to(len);
        Ok(Some(serde_json::from_slice(&payload)?))
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let payload = serde_json::to_vec(&item)?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|_| payload.len() <= MAX_FRAME_SIZE)
            .ok_or(CodecError::FrameTooLarge(payload.len()))?;

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32(len);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Socket error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {0} bytes (limit {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),
}

#[cfg(test)]
mod tests {
    #![allow(clippy::cast_possible_truncation)] // Test constants bounded to u32

    use super::*;
    use crate::operation::Arguments;
    use crate::protocol::{Request, Response, RpcError};
    use serde_json::json;

    #[test]
    fn test_encode_decode_request() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        let request = Request::new("op", Arguments::positional([json!("CH1")]), 1.into());
        let msg = Message::Request(request);

        codec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_encode_decode_error_response() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        let response = Response::error(1.into(), RpcError::unknown_operation("calibrate"));
        codec
            .encode(Message::Response(response), &mut buf)
            .unwrap();

        let Message::Response(dec) = codec.decode(&mut buf).unwrap().unwrap() else {
            panic!("Expected Response");
        };
        assert_eq!(dec.error.unwrap().operation.as_deref(), Some("calibrate"));
    }

    #[test]
    fn test_partial_decode() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        let msg = Message::Request(Request::new("status", Arguments::none(), 1.into()));
        codec.encode(msg, &mut buf).unwrap();
        let full_buf = buf.clone();

        let mut partial = BytesMut::new();
        partial.extend_from_slice(&full_buf[..2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full_buf[2..6]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full_buf[6..]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn test_decode_empty_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        let first = Message::Request(Request::new("first", Arguments::none(), 1.into()));
        let second = Message::Request(Request::new("second", Arguments::none(), 2.into()));
        codec.encode(first, &mut buf).unwrap();
        codec.encode(second, &mut buf).unwrap();

        let Message::Request(req) = codec.decode(&mut buf).unwrap().unwrap() else {
            panic!("Expected Request");
        };
        assert_eq!(req.operation, "first");

        let Message::Request(req) = codec.decode(&mut buf).unwrap().unwrap() else {
            panic!("Expected Request");
        };
        assert_eq!(req.operation, "second");

        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_too_large() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::FrameTooLarge(_))));
    }

    #[test]
    fn test_invalid_json() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        let invalid_json = b"not valid json";
        buf.put_u32(invalid_json.len() as u32);
        buf.extend_from_slice(invalid_json);

        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        let invalid_utf8 = [0xff, 0xfe, 0x00, 0x01];
        buf.put_u32(invalid_utf8.len() as u32);
        buf.extend_from_slice(&invalid_utf8);

        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_decoder_recovers_after_bad_payload() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        buf.put_u32(3);
        buf.extend_from_slice(b"{{{");
        codec
            .encode(Message::Request(Request::new("ok", Arguments::none(), 2.into())), &mut buf)
            .unwrap();

        assert!(codec.decode(&mut buf).is_err());
        let Message::Request(req) = codec.decode(&mut buf).unwrap().unwrap() else {
            panic!("Expected Request");
        };
        assert_eq!(req.operation, "ok");
    }

    #[test]
    fn test_header_counts_payload_bytes() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        let msg = Message::Request(Request::new("x", Arguments::none(), 1.into()));
        codec.encode(msg, &mut buf).unwrap();

        let header = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(header, buf.len() - HEADER_LEN);
    }

    #[test]
    fn test_codec_error_display() {
        let msg = CodecError::FrameTooLarge(20_000_000).to_string();
        assert!(msg.contains("20000000"));
        assert!(msg.contains("too large"));
    }
}

//! Newline-delimited framing
//!
//! Each frame is one line of UTF-8 text terminated by `\n`; a `\r` before the
//! newline is stripped. A single read may carry zero, one or several frames,
//! or only part of one, so the codec works on an accumulating [`BytesMut`]
//! and only yields complete lines.

use std::fmt::Display;

use bytes::{Buf, BytesMut};

use crate::error::ProtocolError;

/// Longest accepted frame, excluding the line terminator
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1024;

#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Bytes already scanned for a newline in the pending partial frame
    next_index: usize,
    /// Dropping the rest of an oversized frame
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Take the next complete frame out of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A frame over the length
    /// limit yields [`ProtocolError::FrameTooLong`] once; its remaining bytes
    /// are dropped up to the next newline so decoding can resume afterwards.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        loop {
            if self.discarding {
                match buf.iter().position(|b| *b == b'\n') {
                    Some(offset) => {
                        buf.advance(offset + 1);
                        self.discarding = false;
                        self.next_index = 0;
                    }
                    None => {
                        buf.clear();
                        return Ok(None);
                    }
                }
                continue;
            }

            let read_to = buf.len().min(self.max_length + 1);
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            return match newline {
                Some(index) => {
                    let frame = buf.split_to(index + 1);
                    self.next_index = 0;
                    let mut line = &frame[..index];
                    if let Some(stripped) = line.strip_suffix(b"\r") {
                        line = stripped;
                    }
                    std::str::from_utf8(line)
                        .map(|text| Some(text.to_string()))
                        .map_err(|_| ProtocolError::InvalidUtf8)
                }
                None if buf.len() > self.max_length => {
                    self.discarding = true;
                    self.next_index = 0;
                    Err(ProtocolError::FrameTooLong {
                        limit: self.max_length,
                    })
                }
                None => {
                    self.next_index = read_to;
                    Ok(None)
                }
            };
        }
    }

    /// Like [`decode`](Self::decode), but treats leftover bytes at end of
    /// stream as a final unterminated frame.
    pub fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }

        let frame = buf.split();
        self.next_index = 0;
        let mut line = &frame[..];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        std::str::from_utf8(line)
            .map(|text| Some(text.to_string()))
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Append `item` followed by a newline.
    pub fn encode<T: Display>(&self, item: &T, dst: &mut BytesMut) {
        let text = item.to_string();
        dst.reserve(text.len() + 1);
        dst.extend_from_slice(text.as_bytes());
        dst.extend_from_slice(b"\n");
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, Reply};
    use locksmith_core::LockMode;
    use proptest::prelude::*;

    fn drain(codec: &mut LineCodec, buf: &mut BytesMut) -> Vec<Result<String, ProtocolError>> {
        let mut frames = Vec::new();
        loop {
            match codec.decode(buf) {
                Ok(Some(frame)) => frames.push(Ok(frame)),
                Ok(None) => break,
                Err(e) => frames.push(Err(e)),
            }
        }
        frames
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"LOCK r1 c1 WRITE\nUNLOCK r1 c1\r\nLOCK r2"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("LOCK r1 c1 WRITE"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("UNLOCK r1 c1"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"LOCK r2");

        buf.extend_from_slice(b" c3 READ\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("LOCK r2 c3 READ"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_split_byte_by_byte() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for byte in b"UNLOCK r1 c1\nLOCK r1 c2 READ\n" {
            buf.extend_from_slice(&[*byte]);
            if let Some(frame) = codec.decode(&mut buf).unwrap() {
                frames.push(frame);
            }
        }
        assert_eq!(frames, vec!["UNLOCK r1 c1", "LOCK r1 c2 READ"]);
    }

    #[test]
    fn test_oversized_frame_is_skipped() {
        let mut codec = LineCodec::with_max_length(8);
        let mut buf = BytesMut::from(&b"0123456789abcdef"[..]);
        assert_eq!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLong { limit: 8 })
        );
        // the tail of the long frame arrives later, followed by a good frame
        buf.extend_from_slice(b"ghij\nok\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("ok"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_frame_at_length_limit_is_accepted() {
        let mut codec = LineCodec::with_max_length(4);
        let mut buf = BytesMut::from(&b"abcd\nabcde\nxy\n"[..]);
        let frames = drain(&mut codec, &mut buf);
        assert_eq!(
            frames,
            vec![
                Ok("abcd".to_string()),
                Err(ProtocolError::FrameTooLong { limit: 4 }),
                Ok("xy".to_string()),
            ]
        );
    }

    #[test]
    fn test_invalid_utf8_consumes_frame() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\xff\xfe\nUNLOCK a b\n"[..]);
        assert_eq!(codec.decode(&mut buf), Err(ProtocolError::InvalidUtf8));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("UNLOCK a b"));
    }

    #[test]
    fn test_decode_eof_returns_unterminated_tail() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"LOCK r1 c1 WRITE"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap().as_deref(),
            Some("LOCK r1 c1 WRITE")
        );
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_encode_appends_newline() {
        let codec = LineCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(&Command::lock("r1", "c1", LockMode::Write).unwrap(), &mut dst);
        codec.encode(&Reply::Success, &mut dst);
        assert_eq!(&dst[..], b"LOCK r1 c1 WRITE\nSUCCESS\n");
    }

    proptest! {
        #[test]
        fn prop_frames_survive_arbitrary_chunking(
            lines in proptest::collection::vec("[A-Za-z0-9 ]{0,40}", 1..20),
            chunk in 1usize..64,
        ) {
            let mut wire = Vec::new();
            for line in &lines {
                wire.extend_from_slice(line.as_bytes());
                wire.push(b'\n');
            }

            let mut codec = LineCodec::new();
            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();
            for piece in wire.chunks(chunk) {
                buf.extend_from_slice(piece);
                while let Some(frame) = codec.decode(&mut buf).unwrap() {
                    decoded.push(frame);
                }
            }

            prop_assert_eq!(decoded, lines);
            prop_assert!(buf.is_empty());
        }
    }
}

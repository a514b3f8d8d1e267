//! Line-delimited JSON framing for the worker wire protocol.
//!
//! [`MessageCodec`] wraps [`LinesCodec`], so partial lines are buffered until
//! a newline arrives regardless of the underlying transport. A line that does
//! not decode as a [`Message`] is surfaced as [`Frame::Text`] instead of an
//! error: workers are allowed to print diagnostic chatter on the same stream.
//! Lines longer than [`MAX_LINE_LENGTH`] are dropped and replaced by a short
//! placeholder; only I/O failures end the stream.

use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use super::message::Message;

/// Longest accepted line, in bytes.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// One decoded line from a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A well-formed protocol message.
    Message(Message),
    /// Anything else, preserved verbatim (minus the line terminator).
    Text(String),
}

/// A line that could not be decoded into a [`Message`].
#[derive(Debug, Error)]
#[error("malformed protocol line: {source}")]
pub struct DecodeError {
    pub line: String,
    #[source]
    pub source: serde_json::Error,
}

/// Transport-level codec failures. These end the stream; decode failures do not.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line framing error: {0}")]
    Lines(#[from] LinesCodecError),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Decode a single line into a [`Message`].
pub fn decode_line(line: &str) -> Result<Message, DecodeError> {
    serde_json::from_str(line).map_err(|source| DecodeError {
        line: line.to_string(),
        source,
    })
}

/// Encode a [`Message`] as one newline-terminated line.
pub fn encode_line(message: &Message) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode a raw line into a [`Frame`], downgrading decode failures to text.
pub fn classify_line(line: &str) -> Frame {
    match decode_line(line) {
        Ok(message) => Frame::Message(message),
        Err(e) => {
            tracing::trace!(error = %e, "treating undecodable line as text");
            Frame::Text(line.to_string())
        }
    }
}

/// Framed codec for worker stdio (or any byte stream carrying the protocol).
#[derive(Debug, Clone)]
pub struct MessageCodec {
    lines: LinesCodec,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Text shown in place of a line longer than [`MAX_LINE_LENGTH`].
pub fn oversized_placeholder() -> String {
    format!("<line exceeded {MAX_LINE_LENGTH} bytes, discarded>")
}

/// Map an over-long line to [`oversized_placeholder`]. [`LinesCodec`] has
/// already started discarding it, so decoding can carry on.
fn bounded(line: Result<Option<String>, LinesCodecError>) -> Result<Option<String>, CodecError> {
    match line {
        Ok(line) => Ok(line),
        Err(LinesCodecError::MaxLineLengthExceeded) => {
            tracing::warn!(max = MAX_LINE_LENGTH, "discarding over-long line");
            Ok(Some(oversized_placeholder()))
        }
        Err(LinesCodecError::Io(e)) => Err(CodecError::Io(e)),
    }
}

fn frame_line(line: String) -> Option<Frame> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match classify_line(trimmed) {
        Frame::Text(_) => Some(Frame::Text(line)),
        message => Some(message),
    }
}

impl Decoder for MessageCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        while let Some(line) = bounded(self.lines.decode(buf))? {
            if let Some(frame) = frame_line(line) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        while let Some(line) = bounded(self.lines.decode_eof(buf))? {
            if let Some(frame) = frame_line(line) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }
}

/// Plain text lines with the same length bound as [`MessageCodec`], for
/// streams that never carry protocol messages (worker stderr).
#[derive(Debug, Clone)]
pub struct TextLineCodec {
    lines: LinesCodec,
}

impl TextLineCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }
}

impl Default for TextLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TextLineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, CodecError> {
        bounded(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, CodecError> {
        bounded(self.lines.decode_eof(buf))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let line = serde_json::to_string(&item)?;
        self.lines.encode(line, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{MessageType, payload};
    use serde_json::json;

    fn decode_all(input: &str) -> Vec<Frame> {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        while let Some(frame) = codec.decode_eof(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn encode_produces_single_terminated_line() {
        let mut codec = MessageCodec::new();
        let mut dst = BytesMut::new();
        let msg = Message::new(MessageType::Shutdown, "w_3", payload(json!({})));
        codec.encode(msg.clone(), &mut dst).unwrap();

        let text = std::str::from_utf8(&dst).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);
        assert_eq!(decode_line(text.trim_end()).unwrap(), msg);
        assert_eq!(encode_line(&msg).unwrap(), text);
    }

    #[test]
    fn malformed_line_becomes_text_with_raw_content() {
        let frames = decode_all("Loading model weights...\n{\"type\":\"log\",\"id\":\"1\",\"payload\":{}}\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Frame::Text("Loading model weights...".to_string()));
        assert!(matches!(&frames[1], Frame::Message(m) if m.kind == MessageType::Log));
    }

    #[test]
    fn partial_lines_are_buffered() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(r#"{"type":"progress","id":"p1","#);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\"payload\":{\"progress\":40}}\r\n");
        match codec.decode(&mut buf).unwrap() {
            Some(Frame::Message(m)) => {
                assert_eq!(m.kind, MessageType::Progress);
                assert_eq!(m.payload.get("progress"), Some(&json!(40)));
            }
            other => panic!("expected message frame, got {other:?}"),
        }
    }

    #[test]
    fn blank_lines_are_skipped() {
        let frames = decode_all("\n   \n{\"type\":\"initialized\"}\n\n");
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn trailing_line_without_newline_is_decoded_at_eof() {
        let frames = decode_all("not json at all");
        assert_eq!(frames, vec![Frame::Text("not json at all".to_string())]);
    }

    #[test]
    fn text_keeps_leading_indentation() {
        let frames = decode_all("    at src/main.rs:12\r\n\tcaused by: boom\n");
        assert_eq!(
            frames,
            vec![
                Frame::Text("    at src/main.rs:12".to_string()),
                Frame::Text("\tcaused by: boom".to_string()),
            ]
        );
    }

    #[test]
    fn over_long_line_is_replaced_and_stream_continues() {
        let mut input = "x".repeat(MAX_LINE_LENGTH + 10);
        input.push('\n');
        input.push_str(r#"{"type":"log","id":"2","payload":{"message":"after"}}"#);
        input.push('\n');

        let frames = decode_all(&input);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Frame::Text(oversized_placeholder()));
        assert!(matches!(&frames[1], Frame::Message(m) if m.payload_str("message") == Some("after")));
    }

    #[test]
    fn over_long_line_split_across_reads() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from("y".repeat(MAX_LINE_LENGTH + 1).as_str());
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Text(oversized_placeholder())));

        buf.extend_from_slice(b"yyyy tail of the long line\nnext\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Text("next".to_string())));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn text_lines_survive_an_over_long_line() {
        let mut codec = TextLineCodec::new();
        let mut buf = BytesMut::from(format!("{}\npanicked at src/lib.rs\n", "z".repeat(MAX_LINE_LENGTH + 5)).as_str());
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(oversized_placeholder()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("panicked at src/lib.rs".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn json_with_unknown_type_is_text() {
        let raw = r#"{"type":"mystery","id":"1","payload":{}}"#;
        assert_eq!(classify_line(raw), Frame::Text(raw.to_string()));
        assert!(decode_line(raw).is_err());
    }
}

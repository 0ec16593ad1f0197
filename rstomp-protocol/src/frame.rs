//! STOMP frame representation and serialization.
//!
//! Wire layout of one frame:
//!
//! ```text
//! COMMAND<eol>
//! key:value<eol>
//! ...
//! <eol>
//! body bytes NUL
//! ```
//!
//! The line terminator is `\n` through protocol 1.1 and `\r\n` from 1.2;
//! the frame terminator is always a single NUL byte. At 1.2 header keys
//! and values are backslash-escaped; below 1.2 the serializer writes a
//! single space after the colon and values go out raw.

use crate::version::ProtocolVersion;
use bytes::{BufMut, Bytes, BytesMut};

/// One STOMP protocol unit: command, ordered headers, optional body.
///
/// Headers carry lowercase keys, unique within the frame, in insertion
/// order. A frame with an empty command is a heartbeat marker and
/// serializes to bare line-terminator bytes.
///
/// Frames are built by [`StompBuilder`](crate::builder::StompBuilder) or
/// produced by [`Parser`](crate::parser::Parser) and are immutable from
/// the outside once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: String,
    headers: Vec<(String, String)>,
    body: Bytes,
    version: ProtocolVersion,
}

impl Frame {
    pub(crate) fn new(command: impl Into<String>, version: ProtocolVersion) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            version,
        }
    }

    /// A heartbeat marker: empty command, no headers, no body.
    pub fn heartbeat(version: ProtocolVersion) -> Self {
        Self::new("", version)
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Headers in insertion order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Looks up a header value by (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Heartbeat frames have an empty command and are treated as NOOPs by
    /// the dispatch layer, never as errors.
    pub fn is_heartbeat(&self) -> bool {
        self.command.is_empty()
    }

    /// Inserts a header, replacing any existing value for the same key.
    /// Keys are lowercased; insertion order is preserved.
    pub(crate) fn push_header(&mut self, key: &str, value: impl Into<String>) {
        let key = key.to_ascii_lowercase();
        let value = value.into();
        if let Some(slot) = self.headers.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.headers.push((key, value));
        }
    }

    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    /// Serializes the frame to wire bytes. Pure function of state.
    pub fn to_bytes(&self) -> BytesMut {
        let eol = self.version.eol().as_bytes();
        if self.is_heartbeat() {
            return BytesMut::from(eol);
        }

        let mut buf = BytesMut::with_capacity(self.wire_size_hint());
        buf.put_slice(self.command.to_ascii_uppercase().as_bytes());
        buf.put_slice(eol);

        for (key, value) in &self.headers {
            if self.version.escapes_headers() {
                buf.put_slice(escape(key).as_bytes());
                buf.put_u8(b':');
                buf.put_slice(escape(value).as_bytes());
            } else {
                buf.put_slice(key.as_bytes());
                buf.put_slice(b": ");
                buf.put_slice(value.as_bytes());
            }
            buf.put_slice(eol);
        }

        buf.put_slice(eol);
        buf.put_slice(&self.body);
        buf.put_u8(0);
        buf
    }

    /// Human-readable rendering for logs and diagnostics. Header values
    /// appear unescaped regardless of level; a non-UTF-8 body is shown as
    /// a byte-count placeholder.
    pub fn to_display_string(&self) -> String {
        if self.is_heartbeat() {
            return "<heartbeat>".to_string();
        }

        let mut out = String::new();
        out.push_str(&self.command.to_ascii_uppercase());
        out.push('\n');
        for (key, value) in &self.headers {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        match std::str::from_utf8(&self.body) {
            Ok(text) => out.push_str(text),
            Err(_) => out.push_str(&format!("<{} body bytes>", self.body.len())),
        }
        out
    }

    fn wire_size_hint(&self) -> usize {
        let headers: usize = self
            .headers
            .iter()
            .map(|(k, v)| k.len() + v.len() + 4)
            .sum();
        self.command.len() + headers + self.body.len() + 8
    }
}

/// Escapes a header key or value per the 1.2 grammar: backslash, CR, LF
/// and colon become two-character sequences.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

/// Reverses [`escape`]. Exactly the four defined sequences are decoded;
/// an unrecognized escape or a trailing backslash passes through intact,
/// so the function is total.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_connect_serialization_v10() {
        let mut frame = Frame::new("CONNECT", ProtocolVersion::V1_0);
        frame.push_header("login", "guest");
        frame.push_header("passcode", "guest");

        let bytes = frame.to_bytes();
        assert_eq!(&bytes[..], b"CONNECT\nlogin: guest\npasscode: guest\n\n\0");
    }

    #[test]
    fn test_send_serialization_v10() {
        let mut frame = Frame::new("SEND", ProtocolVersion::V1_0);
        frame.push_header("destination", "/queue/a");
        frame.push_header("content-length", "2");
        frame.set_body(Bytes::from_static(b"hi"));

        let bytes = frame.to_bytes();
        assert_eq!(
            &bytes[..],
            b"SEND\ndestination: /queue/a\ncontent-length: 2\n\nhi\0"
        );
    }

    #[test]
    fn test_v12_uses_crlf_and_no_space() {
        let mut frame = Frame::new("SEND", ProtocolVersion::V1_2);
        frame.push_header("destination", "/queue/a");

        let bytes = frame.to_bytes();
        assert_eq!(&bytes[..], b"SEND\r\ndestination:/queue/a\r\n\r\n\0");
    }

    #[test]
    fn test_v12_escapes_header_values() {
        let mut frame = Frame::new("SEND", ProtocolVersion::V1_2);
        frame.push_header("destination", "a:b\nc");

        let bytes = frame.to_bytes();
        assert_eq!(&bytes[..], b"SEND\r\ndestination:a\\cb\\nc\r\n\r\n\0");
    }

    #[test]
    fn test_heartbeat_serialization() {
        assert_eq!(&Frame::heartbeat(ProtocolVersion::V1_1).to_bytes()[..], b"\n");
        assert_eq!(&Frame::heartbeat(ProtocolVersion::V1_2).to_bytes()[..], b"\r\n");
        assert!(Frame::heartbeat(ProtocolVersion::V1_0).is_heartbeat());
    }

    #[test]
    fn test_command_uppercased() {
        let frame = Frame::new("connect", ProtocolVersion::V1_0);
        assert!(frame.to_bytes().starts_with(b"CONNECT\n"));
    }

    #[test]
    fn test_header_replacement_keeps_order() {
        let mut frame = Frame::new("SEND", ProtocolVersion::V1_0);
        frame.push_header("a", "1");
        frame.push_header("b", "2");
        frame.push_header("A", "3");

        assert_eq!(
            frame.headers(),
            &[("a".to_string(), "3".to_string()), ("b".to_string(), "2".to_string())]
        );
        assert_eq!(frame.header("A"), Some("3"));
        assert_eq!(frame.header("missing"), None);
    }

    #[test]
    fn test_escape_sequences() {
        assert_eq!(escape("a:b"), "a\\cb");
        assert_eq!(escape("a\\b"), "a\\\\b");
        assert_eq!(escape("a\nb\rc"), "a\\nb\\rc");
        assert_eq!(unescape("a\\cb"), "a:b");
        assert_eq!(unescape("a\\\\b"), "a\\b");
        assert_eq!(unescape("a\\nb\\rc"), "a\nb\rc");
        // unknown escapes and a trailing backslash pass through
        assert_eq!(unescape("a\\tb"), "a\\tb");
        assert_eq!(unescape("a\\"), "a\\");
    }

    #[test]
    fn test_display_string() {
        let mut frame = Frame::new("MESSAGE", ProtocolVersion::V1_2);
        frame.push_header("destination", "/topic/x");
        frame.set_body(Bytes::from_static(b"hello"));

        let text = frame.to_display_string();
        assert!(text.contains("MESSAGE"));
        assert!(text.contains("destination: /topic/x"));
        assert!(text.contains("hello"));

        let mut binary = Frame::new("MESSAGE", ProtocolVersion::V1_2);
        binary.set_body(Bytes::from_static(&[0xff, 0xfe]));
        assert!(binary.to_display_string().contains("<2 body bytes>"));

        assert_eq!(
            Frame::heartbeat(ProtocolVersion::V1_0).to_display_string(),
            "<heartbeat>"
        );
    }

    proptest! {
        #[test]
        fn prop_unescape_inverts_escape(s in "\\PC*") {
            prop_assert_eq!(unescape(&escape(&s)), s);
        }
    }
}

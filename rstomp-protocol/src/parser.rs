//! Incremental STOMP frame parser.
//!
//! One parser per connection. Bytes are appended with [`Parser::extend`]
//! as they arrive; [`Parser::next_frame`] runs the state machine over
//! whatever is buffered and returns `Ok(None)` when a frame is still
//! incomplete. All partial progress (command, header, body accumulators)
//! lives in the parser itself, so a frame may arrive in any number of
//! chunks and parsing resumes exactly where it left off.

use crate::error::ProtocolError;
use crate::frame::{unescape, Frame};
use crate::version::ProtocolVersion;
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Accumulating the command line.
    Command,
    /// Accumulating a header key, or waiting for the blank line.
    HeaderKey,
    /// Accumulating a header value after the `:`.
    HeaderValue,
    /// Accumulating the body.
    Body,
}

/// Resumable frame parser for one byte stream.
pub struct Parser {
    version: ProtocolVersion,
    max_frame_size: usize,
    buffer: BytesMut,
    state: ParseState,
    command: Vec<u8>,
    key: Vec<u8>,
    value: Vec<u8>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    content_length: Option<usize>,
}

impl Parser {
    /// Creates a parser producing frames tagged with `version`.
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            max_frame_size: MAX_FRAME_SIZE,
            buffer: BytesMut::with_capacity(8192),
            state: ParseState::Command,
            command: Vec::new(),
            key: Vec::new(),
            value: Vec::new(),
            headers: Vec::new(),
            body: Vec::new(),
            content_length: None,
        }
    }

    /// Overrides the per-frame accumulation cap.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Appends received bytes to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the number of bytes currently buffered (excluding partial
    /// accumulators already consumed from the buffer).
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Attempts to extract the next complete frame.
    ///
    /// Returns `Ok(Some(frame))` when a frame completed, `Ok(None)` when
    /// more bytes are needed, and an error when the stream can no longer
    /// be framed (a single frame outgrew the cap, or `content-length` is
    /// unparseable). Call repeatedly: if several frames' worth of bytes
    /// are buffered, each call yields one.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let pending = self.buffer.len() + self.command.len() + self.body.len();
        if pending > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: pending,
                max: self.max_frame_size,
            });
        }

        loop {
            match self.state {
                ParseState::Command => loop {
                    match self.take_byte() {
                        None => return Ok(None),
                        Some(b'\r') => {}
                        Some(b'\n') => {
                            if self.command.is_empty() {
                                // bare terminator: heartbeat marker
                                return Ok(Some(Frame::heartbeat(self.version)));
                            }
                            self.state = ParseState::HeaderKey;
                            break;
                        }
                        Some(b) => self.command.push(b),
                    }
                },
                ParseState::HeaderKey => loop {
                    match self.take_byte() {
                        None => return Ok(None),
                        Some(b'\r') => {}
                        Some(b'\n') => {
                            if self.key.is_empty() {
                                // blank line: header section finished
                                self.begin_body()?;
                            } else {
                                // header line without a colon: empty value
                                self.finish_header();
                            }
                            break;
                        }
                        Some(b':') => {
                            self.state = ParseState::HeaderValue;
                            break;
                        }
                        Some(b) => self.key.push(b),
                    }
                },
                ParseState::HeaderValue => loop {
                    match self.take_byte() {
                        None => return Ok(None),
                        Some(b'\r') => {}
                        Some(b'\n') => {
                            self.finish_header();
                            self.state = ParseState::HeaderKey;
                            break;
                        }
                        Some(b) => self.value.push(b),
                    }
                },
                ParseState::Body => {
                    if !self.fill_body() {
                        return Ok(None);
                    }
                    return Ok(Some(self.complete_frame()));
                }
            }
        }
    }

    fn take_byte(&mut self) -> Option<u8> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.get_u8())
        }
    }

    fn finish_header(&mut self) {
        let key = String::from_utf8_lossy(&self.key).into_owned();
        let value = String::from_utf8_lossy(&self.value).into_owned();
        self.key.clear();
        self.value.clear();

        let (key, value) = if self.version.escapes_headers() {
            (unescape(&key), unescape(&value))
        } else {
            // below 1.2 the serializer pads with one space after the colon
            (key, value.trim_start_matches(' ').to_string())
        };
        let key = key.to_ascii_lowercase();

        // repeated headers: first occurrence wins
        if !self.headers.iter().any(|(k, _)| *k == key) {
            self.headers.push((key, value));
        }
    }

    fn begin_body(&mut self) -> Result<(), ProtocolError> {
        self.content_length = match self.headers.iter().find(|(k, _)| k == "content-length") {
            Some((_, value)) => {
                let parsed = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| ProtocolError::InvalidContentLength(value.clone()))?;
                Some(parsed)
            }
            None => None,
        };
        self.state = ParseState::Body;
        Ok(())
    }

    /// Moves body bytes out of the buffer. Returns true when the body
    /// (and its NUL terminator) is fully consumed.
    fn fill_body(&mut self) -> bool {
        match self.content_length {
            Some(length) => {
                // exact byte count; embedded NULs are part of the body
                let missing = length - self.body.len();
                let take = missing.min(self.buffer.len());
                self.body.extend_from_slice(&self.buffer[..take]);
                self.buffer.advance(take);
                if self.body.len() < length || self.buffer.is_empty() {
                    return false;
                }
                // consume the frame terminator
                self.buffer.advance(1);
                true
            }
            None => {
                // body runs to the first NUL
                match self.buffer.iter().position(|&b| b == 0) {
                    Some(pos) => {
                        self.body.extend_from_slice(&self.buffer[..pos]);
                        self.buffer.advance(pos + 1);
                        true
                    }
                    None => {
                        let len = self.buffer.len();
                        self.body.extend_from_slice(&self.buffer);
                        self.buffer.advance(len);
                        false
                    }
                }
            }
        }
    }

    fn complete_frame(&mut self) -> Frame {
        let command = String::from_utf8_lossy(&self.command).into_owned();
        self.command.clear();

        let mut frame = Frame::new(command, self.version);
        for (key, value) in self.headers.drain(..) {
            frame.push_header(&key, value);
        }
        frame.set_body(Bytes::from(std::mem::take(&mut self.body)));

        self.content_length = None;
        self.state = ParseState::Command;
        frame
    }
}

//! `Content-Length` framing for JSON-RPC messages.
//!
//! Each frame on the wire looks like this:
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <length bytes of UTF-8 JSON>
//! ```
//!
//! Frames follow each other with no delimiter, so the counted length is the
//! only boundary marker. The decoder accepts a bare `\n` as line terminator
//! and ignores headers other than `Content-Length`; the encoder always writes
//! `\r\n`.
//!
//! The decoder is push-based: bytes arrive in chunks of any size through
//! [`FrameDecoder::feed`] and complete frames are pulled out lazily. Partial
//! input is kept for the next call.

use serde::Serialize;
use serde_json::Value;

use crate::rpc::error::FrameError;

/// The only header the decoder interprets.
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Default limit for a single header line.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;

/// Default limit for a frame body.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Serialises a message and prefixes it with its `Content-Length` header.
///
/// # Errors
///
/// Returns an error if the message cannot be serialised to JSON.
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(message)?;
    let mut frame = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Size limits enforced while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderLimits {
    /// Longest accepted header line, terminator excluded.
    pub max_header_bytes: usize,
    /// Largest accepted `Content-Length`.
    pub max_frame_bytes: usize,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Where the decoder is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Reading header lines until `Content-Length` is seen.
    Header,
    /// Length known; skipping header lines until the blank line.
    HeaderEnd,
    /// Counting body bytes.
    Body,
    /// A fatal error was reported; all further input is dropped.
    Failed,
}

/// Incremental decoder for `Content-Length` framed JSON.
#[derive(Debug)]
pub struct FrameDecoder {
    stage: Stage,
    limits: DecoderLimits,
    /// Bytes pushed but not yet consumed.
    input: Vec<u8>,
    /// Read position within `input`.
    cursor: usize,
    /// Current, incomplete header line.
    header: Vec<u8>,
    /// Body length announced by the current frame.
    expected: usize,
    /// Body bytes received so far.
    body: Vec<u8>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Creates a decoder with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DecoderLimits::default())
    }

    /// Creates a decoder with custom limits.
    #[must_use]
    pub const fn with_limits(limits: DecoderLimits) -> Self {
        Self {
            stage: Stage::Header,
            limits,
            input: Vec::new(),
            cursor: 0,
            header: Vec::new(),
            expected: 0,
            body: Vec::new(),
        }
    }

    /// Appends a chunk and returns an iterator over the frames it completes.
    ///
    /// The iterator is lazy. Dropping it early leaves the unread input
    /// buffered; the next call to `feed` or [`next_frame`](Self::next_frame)
    /// resumes exactly where it stopped.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.push(chunk);
        Frames { decoder: self }
    }

    /// Appends a chunk without decoding it.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.stage == Stage::Failed {
            return;
        }
        if self.cursor == self.input.len() {
            self.input.clear();
        } else {
            self.input.drain(..self.cursor);
        }
        self.cursor = 0;
        self.input.extend_from_slice(chunk);
    }

    /// Decodes the next complete frame from the buffered input.
    ///
    /// Returns `None` once the buffered input is exhausted. A fatal error is
    /// returned once; after that the decoder yields nothing.
    pub fn next_frame(&mut self) -> Option<Result<Value, FrameError>> {
        loop {
            match self.stage {
                Stage::Failed => return None,
                Stage::Header | Stage::HeaderEnd => match self.read_line() {
                    Ok(Some(line)) => {
                        if let Err(error) = self.on_header_line(&line) {
                            return Some(Err(self.fail(error)));
                        }
                    }
                    Ok(None) => return None,
                    Err(error) => return Some(Err(self.fail(error))),
                },
                Stage::Body => {
                    let owed = self.expected - self.body.len();
                    let available = &self.input[self.cursor..];
                    let take = owed.min(available.len());
                    self.body.extend_from_slice(&available[..take]);
                    self.cursor += take;

                    if self.body.len() < self.expected {
                        return None;
                    }

                    let body = std::mem::take(&mut self.body);
                    self.stage = Stage::Header;
                    self.expected = 0;
                    return Some(
                        serde_json::from_slice(&body)
                            .map_err(|source| FrameError::Malformed { source }),
                    );
                }
            }
        }
    }

    /// Checks that the stream may end here.
    ///
    /// Call after draining all frames, when the byte source reports EOF.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Truncated`] if a frame was started but not
    /// completed.
    pub fn finish(&self) -> Result<(), FrameError> {
        match self.stage {
            Stage::Failed => Ok(()),
            Stage::Header if self.is_idle() => Ok(()),
            Stage::Header => Err(FrameError::Truncated { missing: 0 }),
            Stage::HeaderEnd => Err(FrameError::Truncated {
                missing: self.expected,
            }),
            Stage::Body => Err(FrameError::Truncated {
                missing: self.expected - self.body.len(),
            }),
        }
    }

    /// Returns `true` if no frame is partially buffered.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.stage == Stage::Header && self.header.is_empty() && self.cursor == self.input.len()
    }

    /// Returns `true` after a fatal error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.stage == Stage::Failed
    }

    /// Reads up to the next `\n`, returning the line without its terminator.
    fn read_line(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let rest = &self.input[self.cursor..];
        let (chunk, complete) = match rest.iter().position(|&b| b == b'\n') {
            Some(at) => (&rest[..at], true),
            None => (rest, false),
        };
        self.header.extend_from_slice(chunk);
        self.cursor += chunk.len() + usize::from(complete);

        if self.header.len() > self.limits.max_header_bytes + 1 {
            return Err(FrameError::HeaderTooLong {
                limit: self.limits.max_header_bytes,
            });
        }
        if !complete {
            return Ok(None);
        }

        let mut line = std::mem::take(&mut self.header);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.len() > self.limits.max_header_bytes {
            return Err(FrameError::HeaderTooLong {
                limit: self.limits.max_header_bytes,
            });
        }
        Ok(Some(line))
    }

    fn on_header_line(&mut self, line: &[u8]) -> Result<(), FrameError> {
        match self.stage {
            Stage::Header => {
                if line.is_empty() {
                    return Err(FrameError::MissingContentLength);
                }
                if let Some(length) = parse_content_length(line)? {
                    if length > self.limits.max_frame_bytes {
                        return Err(FrameError::FrameTooLarge {
                            length,
                            limit: self.limits.max_frame_bytes,
                        });
                    }
                    self.expected = length;
                    self.stage = Stage::HeaderEnd;
                }
            }
            Stage::HeaderEnd => {
                if line.is_empty() {
                    self.body.clear();
                    self.body.reserve(self.expected);
                    self.stage = Stage::Body;
                }
            }
            Stage::Body | Stage::Failed => {}
        }
        Ok(())
    }

    fn fail(&mut self, error: FrameError) -> FrameError {
        self.stage = Stage::Failed;
        self.input = Vec::new();
        self.cursor = 0;
        self.header = Vec::new();
        self.body = Vec::new();
        error
    }
}

/// Parses a `Content-Length` header line.
///
/// Returns `Ok(None)` for any other header. The header name is matched
/// case-insensitively.
fn parse_content_length(line: &[u8]) -> Result<Option<usize>, FrameError> {
    let text = String::from_utf8_lossy(line);
    let Some((name, value)) = text.split_once(':') else {
        return Ok(None);
    };
    if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
        return Ok(None);
    }
    let value = value.trim();
    value
        .parse::<usize>()
        .map(Some)
        .map_err(|_| FrameError::InvalidContentLength {
            value: value.to_string(),
        })
}

/// Lazy iterator over the frames completed by a [`FrameDecoder::feed`] call.
#[derive(Debug)]
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Result<Value, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame()
    }
}

//! Error types for framing, message decoding and session handling.

use std::io;

use thiserror::Error;

use crate::rpc::protocol::RequestId;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by the frame decoder.
///
/// All variants except [`FrameError::Malformed`] are fatal: the stream has no
/// boundary marker to resynchronise on, so decoding stops for good.
#[derive(Debug, Error)]
pub enum FrameError {
    /// A blank line ended the header block before any `Content-Length`.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// The `Content-Length` value is not an unsigned integer.
    #[error("invalid Content-Length value: {value:?}")]
    InvalidContentLength {
        /// The raw header value.
        value: String,
    },

    /// A header line exceeded the configured limit.
    #[error("header line exceeds {limit} bytes")]
    HeaderTooLong {
        /// The configured limit.
        limit: usize,
    },

    /// The announced body is larger than the configured limit.
    #[error("frame of {length} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// The announced body length.
        length: usize,
        /// The configured limit.
        limit: usize,
    },

    /// The stream ended in the middle of a frame.
    #[error("stream ended mid-frame ({missing} body bytes outstanding)")]
    Truncated {
        /// Body bytes still owed, zero if the stream ended inside the headers.
        missing: usize,
    },

    /// The body is not valid JSON. Only this frame is lost.
    #[error("frame body is not valid JSON: {source}")]
    Malformed {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl FrameError {
    /// Returns `true` if decoding cannot continue after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Malformed { .. })
    }
}

/// A decoded JSON value that is not a well-formed message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload is not a JSON object.
    #[error("message is not a JSON object")]
    NotAnObject,

    /// A response carried neither `result` nor `error`.
    #[error("response has neither result nor error")]
    MissingOutcome,

    /// A member has the wrong type.
    #[error("malformed message: {0}")]
    Shape(#[from] serde_json::Error),
}

/// Errors raised by the pending call ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A request with this ID is already awaiting its response.
    #[error("request ID {id} is already in flight")]
    DuplicateId {
        /// The conflicting ID.
        id: RequestId,
    },
}

/// Errors raised by a [`Session`](crate::rpc::Session) or its transport.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Fatal framing error on the input stream.
    #[error("framing error: {0}")]
    Framing(#[from] FrameError),

    /// The outgoing request could not be recorded.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// An outgoing message could not be serialised.
    #[error("failed to serialise message: {0}")]
    Encode(#[source] serde_json::Error),

    /// Reading or writing the byte stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The session has been shut down.
    #[error("session is closed")]
    Closed,
}

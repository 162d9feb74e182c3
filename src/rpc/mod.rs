//! Bidirectional JSON-RPC 2.0 over `Content-Length` framed byte streams.
//!
//! Either peer may send requests and notifications at any time. Responses
//! are matched to our own requests by ID through the pending call ledger.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Session                            │
//! │                                                              │
//! │  bytes ──▶ FrameDecoder ──▶ classify ──▶ Router ──▶ handlers │
//! │                                            │                 │
//! │                                            ▼                 │
//! │                                      PendingCalls            │
//! │                                                              │
//! │  bytes ◀── encode ◀──────────── Context (outgoing queue)     │
//! └──────────────────────────────────────────────────────────────┘
//!                 ▲                                 │
//!                 └──────────── Transport ◀─────────┘
//! ```
//!
//! The [`Session`] performs no I/O; the [`Transport`] drives one over any
//! async byte source and sink.

pub mod codec;
pub mod error;
pub mod ledger;
pub mod protocol;
pub mod router;
pub mod session;
pub mod transport;

pub use codec::{encode, DecoderLimits, FrameDecoder, CONTENT_LENGTH};
pub use error::{FrameError, LedgerError, ProtocolError, SessionError, SessionResult};
pub use ledger::{PendingCall, PendingCalls};
pub use protocol::{
    classify, ErrorCode, Message, MessageKind, Notification, Request, RequestId, Response,
    ResponseError, JSONRPC_VERSION,
};
pub use router::{Dispatched, Router};
pub use session::{Context, Session};
pub use transport::Transport;

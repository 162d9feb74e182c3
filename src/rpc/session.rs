//! A single JSON-RPC conversation with one peer.
//!
//! The [`Session`] owns all mutable state of a connection: the frame decoder,
//! the handler tables, the pending call ledger and the queue of outgoing
//! frames. It performs no I/O itself. Bytes go in through
//! [`Session::feed`], framed bytes come out through
//! [`Session::take_outgoing`], and the caller moves them between the session
//! and the wire (see [`Transport`](crate::rpc::Transport)).
//!
//! Everything runs on the caller's thread. Messages are dispatched in the
//! order their frames complete, and each handler returns before the next
//! message is classified.
//!
//! # Lifecycle
//!
//! 1. **Setup**: register handlers with [`Session::on_request`],
//!    [`Session::on_notification`] and [`Session::on_response`]
//! 2. **Operation**: feed input, send requests and notifications
//! 3. **Shutdown**: [`Session::shutdown`] or end of input; further input and
//!    outgoing messages are rejected with [`SessionError::Closed`]

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::rpc::codec::{self, DecoderLimits, FrameDecoder};
use crate::rpc::error::{SessionError, SessionResult};
use crate::rpc::ledger::{PendingCall, PendingCalls};
use crate::rpc::protocol::{
    classify, Message, MessageKind, Notification, Request, RequestId, Response, ResponseError,
};
use crate::rpc::router::{Dispatched, Router};

/// The sending side of a session, handed to every handler.
///
/// Handlers use it to send further messages (for multi-step exchanges) and
/// to ask for the session to end.
#[derive(Debug, Default)]
pub struct Context {
    pending: PendingCalls,
    outgoing: VecDeque<Vec<u8>>,
    shutdown_requested: bool,
    closed: bool,
}

impl Context {
    /// Creates an open context with nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends a request with a fresh random ID.
    ///
    /// The request is recorded as pending before its frame is queued.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] after shutdown, or an encoding error.
    pub fn request(
        &mut self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> SessionResult<RequestId> {
        self.send_request(Request::new(method, params))
    }

    /// Sends a request whose ID was chosen by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] after shutdown,
    /// [`SessionError::Ledger`] if the ID is already pending, or an encoding
    /// error.
    pub fn send_request(&mut self, request: Request) -> SessionResult<RequestId> {
        self.ensure_open()?;

        let id = request.id.clone();
        let method = request.method.clone();
        let frame = codec::encode(&request).map_err(SessionError::Encode)?;
        self.pending.insert(request)?;
        self.outgoing.push_back(frame);

        debug!(%id, %method, "request sent");
        Ok(id)
    }

    /// Sends a notification.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] after shutdown, or an encoding error.
    pub fn notify(&mut self, method: impl Into<String>, params: Option<Value>) -> SessionResult<()> {
        let notification = Notification::new(method, params);
        self.enqueue(&notification)?;
        trace!(method = %notification.method, "notification sent");
        Ok(())
    }

    /// Sends a response.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] after shutdown, or an encoding error.
    pub fn respond(&mut self, response: Response) -> SessionResult<()> {
        self.enqueue(&response)?;
        trace!(id = ?response.id, "response sent");
        Ok(())
    }

    /// Requests that the session shut down once the current message has been
    /// handled.
    pub fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    /// Returns `true` once [`request_shutdown`](Self::request_shutdown) was
    /// called.
    #[must_use]
    pub const fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Requests awaiting their response.
    #[must_use]
    pub const fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    /// Removes and returns the frames queued so far, in send order.
    pub fn take_outgoing(&mut self) -> Vec<Vec<u8>> {
        self.outgoing.drain(..).collect()
    }

    pub(crate) fn ledger_mut(&mut self) -> &mut PendingCalls {
        &mut self.pending
    }

    fn enqueue<T: Serialize>(&mut self, message: &T) -> SessionResult<()> {
        self.ensure_open()?;
        let frame = codec::encode(message).map_err(SessionError::Encode)?;
        self.outgoing.push_back(frame);
        Ok(())
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        Ok(())
    }
}

/// One JSON-RPC conversation: decoder, handler tables, ledger and outbox.
#[derive(Debug)]
pub struct Session {
    decoder: FrameDecoder,
    router: Router,
    context: Context,
    pending_timeout: Option<Duration>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

impl Session {
    /// Creates an open session with empty handler tables.
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            decoder: FrameDecoder::with_limits(DecoderLimits {
                max_header_bytes: config.max_header_bytes,
                max_frame_bytes: config.max_frame_bytes,
            }),
            router: Router::new(),
            context: Context::new(),
            pending_timeout: config.pending_timeout(),
        }
    }

    /// Registers the handler for inbound `method` requests.
    pub fn on_request<F>(&mut self, method: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&mut Context, Option<Value>) -> Result<Value, ResponseError> + 'static,
    {
        self.router.on_request(method, handler);
        self
    }

    /// Registers the handler for inbound `method` notifications.
    pub fn on_notification<F>(&mut self, method: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&mut Context, Option<Value>) -> Result<(), ResponseError> + 'static,
    {
        self.router.on_notification(method, handler);
        self
    }

    /// Registers the callback for responses to our own `method` requests.
    pub fn on_response<F>(&mut self, method: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&mut Context, &Request, &Response) -> bool + 'static,
    {
        self.router.on_response(method, handler);
        self
    }

    /// The handler tables.
    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Feeds a chunk of input and dispatches every message it completes.
    ///
    /// Returns one [`Dispatched`] per message, in stream order. Replies are
    /// queued for [`take_outgoing`](Self::take_outgoing). A frame whose body
    /// is not valid JSON is answered with a parse error and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] after shutdown, and
    /// [`SessionError::Framing`] on a fatal framing error, which also closes
    /// the session.
    pub fn feed(&mut self, chunk: &[u8]) -> SessionResult<Vec<Dispatched>> {
        self.context.ensure_open()?;
        self.decoder.push(chunk);

        let mut outcomes = Vec::new();
        while let Some(frame) = self.decoder.next_frame() {
            let outcome = match frame {
                Ok(payload) => self.handle_payload(payload)?,
                Err(error) if error.is_fatal() => {
                    error!(%error, "fatal framing error, closing session");
                    self.shutdown();
                    return Err(error.into());
                }
                Err(error) => {
                    warn!(%error, "discarding malformed frame");
                    self.context
                        .respond(Response::failure(None, ResponseError::parse_error()))?;
                    Dispatched::Malformed {
                        reason: error.to_string(),
                    }
                }
            };
            outcomes.push(outcome);

            if self.context.shutdown_requested {
                info!("shutdown requested by handler");
                self.shutdown();
                break;
            }
        }
        Ok(outcomes)
    }

    /// Signals the end of input.
    ///
    /// The session is closed afterwards; frames already queued can still be
    /// taken.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Framing`] if the input ended mid-frame.
    pub fn finish(&mut self) -> SessionResult<()> {
        let result = self.decoder.finish();
        if let Err(error) = &result {
            error!(%error, "input ended mid-frame");
        }
        self.shutdown();
        result.map_err(SessionError::from)
    }

    /// Sends a request with a fresh random ID. See [`Context::request`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] after shutdown, or an encoding error.
    pub fn request(
        &mut self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> SessionResult<RequestId> {
        self.context.request(method, params)
    }

    /// Sends a request with a caller-chosen ID. See [`Context::send_request`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] after shutdown,
    /// [`SessionError::Ledger`] if the ID is already pending, or an encoding
    /// error.
    pub fn send_request(&mut self, request: Request) -> SessionResult<RequestId> {
        self.context.send_request(request)
    }

    /// Sends a notification.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] after shutdown, or an encoding error.
    pub fn notify(&mut self, method: impl Into<String>, params: Option<Value>) -> SessionResult<()> {
        self.context.notify(method, params)
    }

    /// Sends a response.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] after shutdown, or an encoding error.
    pub fn respond(&mut self, response: Response) -> SessionResult<()> {
        self.context.respond(response)
    }

    /// Requests awaiting their response.
    #[must_use]
    pub const fn pending(&self) -> &PendingCalls {
        &self.context.pending
    }

    /// Removes and returns the frames queued so far, in send order.
    pub fn take_outgoing(&mut self) -> Vec<Vec<u8>> {
        self.context.take_outgoing()
    }

    /// Returns `true` if frames are waiting to be written.
    #[must_use]
    pub fn has_outgoing(&self) -> bool {
        !self.context.outgoing.is_empty()
    }

    /// The configured pending call timeout.
    #[must_use]
    pub const fn pending_timeout(&self) -> Option<Duration> {
        self.pending_timeout
    }

    /// Drops pending calls older than the configured timeout.
    ///
    /// Does nothing when no timeout is configured.
    pub fn expire_pending(&mut self, now: Instant) -> Vec<PendingCall> {
        let Some(timeout) = self.pending_timeout else {
            return Vec::new();
        };

        let expired = self.context.pending.expire(now, timeout);
        for call in &expired {
            warn!(
                id = %call.id(),
                method = call.method(),
                "request expired without a response"
            );
        }
        expired
    }

    /// Closes the session and returns the calls that will never be answered.
    ///
    /// Idempotent. Queued outgoing frames are kept.
    pub fn shutdown(&mut self) -> Vec<PendingCall> {
        if !self.context.closed {
            debug!("closing session");
        }
        self.context.closed = true;

        let abandoned = self.context.pending.drain();
        for call in &abandoned {
            warn!(
                id = %call.id(),
                method = call.method(),
                "abandoning pending request"
            );
        }
        abandoned
    }

    /// Returns `true` after shutdown or end of input.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.context.closed
    }

    fn handle_payload(&mut self, payload: Value) -> SessionResult<Dispatched> {
        let kind = classify(&payload);
        // Only a request can be answered; keep its id if it is readable.
        let id = match kind {
            MessageKind::Request => payload
                .get("id")
                .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok()),
            MessageKind::Notification | MessageKind::Response => None,
        };

        match Message::from_value(payload) {
            Ok(message) => self.router.dispatch(message, &mut self.context),
            Err(error) => {
                warn!(%error, ?kind, "discarding invalid message");
                if kind == MessageKind::Request {
                    self.context.respond(Response::failure(
                        id,
                        ResponseError::invalid_request(error.to_string()),
                    ))?;
                }
                Ok(Dispatched::Malformed {
                    reason: error.to_string(),
                })
            }
        }
    }
}

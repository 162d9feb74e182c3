//! Handler tables and message dispatch.
//!
//! Three independent tables map a method name to a handler:
//!
//! - inbound requests, answered with the handler's result or error
//! - inbound notifications, never answered
//! - responses to our own requests, keyed by the method of the request
//!   (responses carry no method of their own)
//!
//! Handler panics are caught at the dispatch boundary so that a faulty
//! handler cannot leave the decoder or the ledger half-updated.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::rpc::error::SessionResult;
use crate::rpc::protocol::{
    Message, Notification, Outcome, Request, RequestId, Response, ResponseError, Version,
};
use crate::rpc::session::Context;

/// Handles an inbound request and produces its result or error.
pub type RequestHandler =
    Box<dyn FnMut(&mut Context, Option<Value>) -> Result<Value, ResponseError>>;

/// Handles an inbound notification.
pub type NotificationHandler =
    Box<dyn FnMut(&mut Context, Option<Value>) -> Result<(), ResponseError>>;

/// Handles the response to one of our requests.
///
/// Receives the original request and the response. Returns `true` when the
/// exchange is complete and the pending call can be forgotten, `false` to
/// keep it pending.
pub type ResponseHandler = Box<dyn FnMut(&mut Context, &Request, &Response) -> bool>;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// A request was answered with this response (already queued).
    Replied(Response),
    /// A notification handler ran successfully.
    Notified {
        /// The notification method.
        method: String,
    },
    /// A notification handler failed or panicked.
    Failed {
        /// The notification method.
        method: String,
        /// What went wrong.
        error: ResponseError,
    },
    /// No handler is registered for this notification.
    Ignored {
        /// The notification method.
        method: String,
    },
    /// A response was matched to a pending request.
    Correlated {
        /// The correlation ID.
        id: RequestId,
        /// The method of the original request.
        method: String,
        /// Whether the pending call was removed.
        completed: bool,
    },
    /// A response whose ID matches no pending request.
    Uncorrelated(Response),
    /// A response with a `null` ID: the peer failed without knowing which
    /// request caused it.
    Fault(Response),
    /// The payload could not be decoded or interpreted.
    Malformed {
        /// Description of the problem.
        reason: String,
    },
}

/// The three handler tables.
#[derive(Default)]
pub struct Router {
    requests: HashMap<String, RequestHandler>,
    notifications: HashMap<String, NotificationHandler>,
    responses: HashMap<String, ResponseHandler>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("requests", &self.requests.keys().collect::<Vec<_>>())
            .field("notifications", &self.notifications.keys().collect::<Vec<_>>())
            .field("responses", &self.responses.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Router {
    /// Creates a router with empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for inbound `method` requests, replacing any
    /// previous one.
    pub fn on_request<F>(&mut self, method: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&mut Context, Option<Value>) -> Result<Value, ResponseError> + 'static,
    {
        self.requests.insert(method.into(), Box::new(handler));
        self
    }

    /// Registers the handler for inbound `method` notifications.
    pub fn on_notification<F>(&mut self, method: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&mut Context, Option<Value>) -> Result<(), ResponseError> + 'static,
    {
        self.notifications.insert(method.into(), Box::new(handler));
        self
    }

    /// Registers the callback for responses to our own `method` requests.
    pub fn on_response<F>(&mut self, method: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&mut Context, &Request, &Response) -> bool + 'static,
    {
        self.responses.insert(method.into(), Box::new(handler));
        self
    }

    /// Returns `true` if a request handler is registered for `method`.
    #[must_use]
    pub fn handles_request(&self, method: &str) -> bool {
        self.requests.contains_key(method)
    }

    /// Returns `true` if a notification handler is registered for `method`.
    #[must_use]
    pub fn handles_notification(&self, method: &str) -> bool {
        self.notifications.contains_key(method)
    }

    /// Returns `true` if a response callback is registered for `method`.
    #[must_use]
    pub fn handles_response(&self, method: &str) -> bool {
        self.responses.contains_key(method)
    }

    /// Dispatches one inbound message.
    ///
    /// Replies to requests are queued on `cx` before returning.
    ///
    /// # Errors
    ///
    /// Returns an error only if a reply cannot be queued.
    pub fn dispatch(&mut self, message: Message, cx: &mut Context) -> SessionResult<Dispatched> {
        match message {
            Message::Request(request) => self.dispatch_request(request, cx),
            Message::Notification(notification) => {
                Ok(self.dispatch_notification(notification, cx))
            }
            Message::Response(response) => Ok(self.dispatch_response(response, cx)),
        }
    }

    fn dispatch_request(&mut self, request: Request, cx: &mut Context) -> SessionResult<Dispatched> {
        let Request {
            id, method, params, ..
        } = request;

        let outcome = match self.requests.get_mut(&method) {
            Some(handler) => {
                trace!(%id, %method, "dispatching request");
                match panic::catch_unwind(AssertUnwindSafe(|| handler(cx, params))) {
                    Ok(Ok(result)) => Outcome::Result(result),
                    Ok(Err(error)) => {
                        debug!(%id, %method, %error, "request handler returned an error");
                        Outcome::Error(error)
                    }
                    Err(payload) => {
                        error!(
                            %id,
                            %method,
                            panic = %panic_message(&*payload),
                            "request handler panicked"
                        );
                        Outcome::Error(ResponseError::internal_error(format!(
                            "Handler for {method} failed"
                        )))
                    }
                }
            }
            None => {
                debug!(%id, %method, "no handler registered for request");
                Outcome::Error(ResponseError::method_not_found(&method))
            }
        };

        let response = Response {
            jsonrpc: Version,
            id: Some(id),
            outcome,
        };
        cx.respond(response.clone())?;
        Ok(Dispatched::Replied(response))
    }

    fn dispatch_notification(&mut self, notification: Notification, cx: &mut Context) -> Dispatched {
        let Notification { method, params, .. } = notification;

        let Some(handler) = self.notifications.get_mut(&method) else {
            trace!(%method, "ignoring notification without handler");
            return Dispatched::Ignored { method };
        };

        trace!(%method, "dispatching notification");
        match panic::catch_unwind(AssertUnwindSafe(|| handler(cx, params))) {
            Ok(Ok(())) => Dispatched::Notified { method },
            Ok(Err(error)) => {
                warn!(%method, %error, "notification handler failed");
                Dispatched::Failed { method, error }
            }
            Err(payload) => {
                error!(
                    %method,
                    panic = %panic_message(&*payload),
                    "notification handler panicked"
                );
                let error = ResponseError::internal_error(format!("Handler for {method} failed"));
                Dispatched::Failed { method, error }
            }
        }
    }

    fn dispatch_response(&mut self, response: Response, cx: &mut Context) -> Dispatched {
        let Some(id) = response.id.clone() else {
            warn!(
                error = ?response.error(),
                "peer reported a failure not tied to any request"
            );
            return Dispatched::Fault(response);
        };

        let Some(call) = cx.ledger_mut().remove(&id) else {
            warn!(%id, "response does not match any pending request");
            return Dispatched::Uncorrelated(response);
        };

        let method = call.request.method.clone();
        let completed = match self.responses.get_mut(&method) {
            Some(handler) => {
                trace!(%id, %method, "dispatching response");
                match panic::catch_unwind(AssertUnwindSafe(|| {
                    handler(cx, &call.request, &response)
                })) {
                    Ok(done) => done,
                    Err(payload) => {
                        error!(
                            %id,
                            %method,
                            panic = %panic_message(&*payload),
                            "response handler panicked, dropping pending call"
                        );
                        true
                    }
                }
            }
            None => {
                debug!(%id, %method, "no response handler registered, dropping pending call");
                true
            }
        };

        if !completed {
            trace!(%id, %method, "keeping pending call open");
            cx.ledger_mut().restore(call);
        }

        Dispatched::Correlated {
            id,
            method,
            completed,
        }
    }
}

/// Extracts the message of a caught panic.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::protocol::ErrorCode;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn request(id: i64, method: &str, params: Option<Value>) -> Message {
        Message::Request(Request::with_id(id, method, params))
    }

    #[test]
    fn request_handler_result_is_echoed_with_id() {
        let mut router = Router::new();
        router.on_request("add", |_, params| {
            let params = params.ok_or_else(|| ResponseError::invalid_params("missing"))?;
            let sum: i64 = params
                .as_array()
                .map(|a| a.iter().filter_map(Value::as_i64).sum())
                .unwrap_or_default();
            Ok(json!(sum))
        });

        let mut cx = Context::new();
        let outcome = router
            .dispatch(request(9, "add", Some(json!([1, 2, 3]))), &mut cx)
            .unwrap();

        let Dispatched::Replied(response) = outcome else {
            panic!("Expected Replied");
        };
        assert_eq!(response.id, Some(RequestId::Number(9)));
        assert_eq!(response.result(), Some(&json!(6)));
        assert_eq!(cx.take_outgoing().len(), 1);
    }

    #[test]
    fn request_handler_error_is_forwarded() {
        let mut router = Router::new();
        router.on_request("add", |_, _| Err(ResponseError::invalid_params("no")));

        let mut cx = Context::new();
        let Dispatched::Replied(response) =
            router.dispatch(request(1, "add", None), &mut cx).unwrap()
        else {
            panic!("Expected Replied");
        };
        assert_eq!(response.error().unwrap().kind(), ErrorCode::InvalidParams);
        assert!(response.result().is_none());
    }

    #[test]
    fn unknown_request_gets_method_not_found() {
        let mut router = Router::new();
        let mut cx = Context::new();

        let Dispatched::Replied(response) =
            router.dispatch(request(5, "nope/nothing", None), &mut cx).unwrap()
        else {
            panic!("Expected Replied");
        };
        let error = response.error().unwrap();
        assert_eq!(error.kind(), ErrorCode::MethodNotFound);
        assert!(error.message.contains("nope/nothing"));
        assert_eq!(response.id, Some(RequestId::Number(5)));
    }

    #[test]
    fn panicking_request_handler_becomes_internal_error() {
        let mut router = Router::new();
        router.on_request("boom", |_, _| panic!("handler exploded"));

        let mut cx = Context::new();
        let Dispatched::Replied(response) =
            router.dispatch(request(2, "boom", None), &mut cx).unwrap()
        else {
            panic!("Expected Replied");
        };
        assert_eq!(response.error().unwrap().kind(), ErrorCode::InternalError);
    }

    #[test]
    fn notification_without_handler_is_ignored() {
        let mut router = Router::new();
        let mut cx = Context::new();

        let outcome = router
            .dispatch(Notification::new("$/progress", None).into(), &mut cx)
            .unwrap();
        assert_eq!(
            outcome,
            Dispatched::Ignored {
                method: "$/progress".to_string()
            }
        );
        assert!(cx.take_outgoing().is_empty());
    }

    #[test]
    fn notification_handler_receives_params() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);

        let mut router = Router::new();
        router.on_notification("log", move |_, params| {
            sink.borrow_mut().push(params);
            Ok(())
        });

        let mut cx = Context::new();
        let outcome = router
            .dispatch(Notification::new("log", Some(json!("hi"))).into(), &mut cx)
            .unwrap();
        assert!(matches!(outcome, Dispatched::Notified { .. }));
        assert_eq!(*seen.borrow(), vec![Some(json!("hi"))]);
        assert!(cx.take_outgoing().is_empty());
    }

    #[test]
    fn failing_notification_handler_is_reported() {
        let mut router = Router::new();
        router.on_notification("bad", |_, _| Err(ResponseError::internal_error("nope")));
        router.on_notification("worse", |_, _| panic!("exploded"));

        let mut cx = Context::new();
        let bad = router
            .dispatch(Notification::new("bad", None).into(), &mut cx)
            .unwrap();
        let worse = router
            .dispatch(Notification::new("worse", None).into(), &mut cx)
            .unwrap();

        assert!(matches!(bad, Dispatched::Failed { .. }));
        assert!(matches!(worse, Dispatched::Failed { .. }));
        assert!(cx.take_outgoing().is_empty());
    }

    #[test]
    fn response_invokes_callback_for_request_method() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&calls);

        let mut router = Router::new();
        router.on_response("initialize", move |_, request, response| {
            log.borrow_mut()
                .push((request.method.clone(), response.result().cloned()));
            true
        });

        let mut cx = Context::new();
        let id = cx.request("initialize", None).unwrap();
        assert!(cx.pending().contains(&id));

        let outcome = router
            .dispatch(Response::success(id.clone(), json!({})).into(), &mut cx)
            .unwrap();

        assert_eq!(
            outcome,
            Dispatched::Correlated {
                id: id.clone(),
                method: "initialize".to_string(),
                completed: true
            }
        );
        assert!(!cx.pending().contains(&id));
        assert_eq!(
            *calls.borrow(),
            vec![("initialize".to_string(), Some(json!({})))]
        );
    }

    #[test]
    fn callback_returning_false_keeps_pending_call() {
        let mut router = Router::new();
        router.on_response("watch", |_, _, _| false);

        let mut cx = Context::new();
        let id = cx.request("watch", None).unwrap();

        let outcome = router
            .dispatch(Response::success(id.clone(), Value::Null).into(), &mut cx)
            .unwrap();
        assert!(matches!(
            outcome,
            Dispatched::Correlated {
                completed: false,
                ..
            }
        ));
        assert!(cx.pending().contains(&id));
    }

    #[test]
    fn response_without_callback_drops_pending_call() {
        let mut router = Router::new();
        let mut cx = Context::new();
        let id = cx.request("shutdown", None).unwrap();

        router
            .dispatch(Response::success(id.clone(), Value::Null).into(), &mut cx)
            .unwrap();
        assert!(cx.pending().is_empty());
    }

    #[test]
    fn unknown_response_id_is_uncorrelated() {
        let mut router = Router::new();
        let mut cx = Context::new();

        let outcome = router
            .dispatch(Response::success(RequestId::from("ghost"), json!(1)).into(), &mut cx)
            .unwrap();
        assert!(matches!(outcome, Dispatched::Uncorrelated(_)));
        assert!(cx.take_outgoing().is_empty());
    }

    #[test]
    fn null_id_response_is_a_fault() {
        let mut router = Router::new();
        let mut cx = Context::new();
        cx.request("initialize", None).unwrap();

        let outcome = router
            .dispatch(
                Response::failure(None, ResponseError::parse_error()).into(),
                &mut cx,
            )
            .unwrap();
        assert!(matches!(outcome, Dispatched::Fault(_)));
        assert_eq!(cx.pending().len(), 1);
    }

    #[test]
    fn callback_can_send_follow_up() {
        let mut router = Router::new();
        router.on_response("initialize", |cx, _, _| {
            cx.notify("initialized", Some(json!({}))).is_ok()
        });

        let mut cx = Context::new();
        let id = cx.request("initialize", None).unwrap();
        cx.take_outgoing();

        router
            .dispatch(Response::success(id, json!({})).into(), &mut cx)
            .unwrap();

        let frames = cx.take_outgoing();
        assert_eq!(frames.len(), 1);
        let text = String::from_utf8(frames[0].clone()).unwrap();
        assert!(text.contains(r#""method":"initialized""#));
    }

    #[test]
    fn debug_lists_registered_methods() {
        let mut router = Router::new();
        router.on_request("ping", |_, _| Ok(Value::Null));
        assert!(router.handles_request("ping"));
        assert!(!router.handles_notification("ping"));
        assert!(format!("{router:?}").contains("ping"));
    }
}

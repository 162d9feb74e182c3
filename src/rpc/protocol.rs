//! JSON-RPC 2.0 message types and classification.
//!
//! Every decoded payload is one of three kinds:
//!
//! - **Request**: has `method` and `id`, expects exactly one response
//! - **Notification**: has `method` but no `id`, never answered
//! - **Response**: has no `method`, carries `result` or `error` and the `id`
//!   of the request it answers (`null` when the peer could not tell)
//!
//! Parameters, results and error data are opaque [`Value`]s. This module
//! never looks inside them.

use serde::de::{self, IgnoredAny};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::rpc::error::ProtocolError;

/// The protocol version written into every outgoing message.
pub const JSONRPC_VERSION: &str = "2.0";

/// The `jsonrpc` member of a message.
///
/// Always serialised as `"2.0"`. Incoming values are not checked, and a
/// missing member is accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version;

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        IgnoredAny::deserialize(deserializer)?;
        Ok(Self)
    }
}

/// A JSON-RPC 2.0 request ID.
///
/// IDs are strings or integers. Uniqueness among in-flight requests is the
/// sender's responsibility; [`RequestId::random`] produces collision-free
/// tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl RequestId {
    /// Generates a fresh random string ID (UUID v4).
    #[must_use]
    pub fn random() -> Self {
        Self::String(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for RequestId {
    fn from(value: i32) -> Self {
        Self::Number(i64::from(value))
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version marker.
    #[serde(default)]
    pub jsonrpc: Version,

    /// Correlation identifier echoed by the response.
    pub id: RequestId,

    /// The method to invoke.
    pub method: String,

    /// Optional parameters for the method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Creates a request with a fresh random ID.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::with_id(RequestId::random(), method, params)
    }

    /// Creates a request with a caller-chosen ID.
    #[must_use]
    pub fn with_id(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Version,
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification message.
///
/// Notifications have no `id` and never receive a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Protocol version marker.
    #[serde(default)]
    pub jsonrpc: Version,

    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Creates a new notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Version,
            method: method.into(),
            params,
        }
    }
}

/// Standard JSON-RPC 2.0 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received.
    ParseError,
    /// The JSON sent is not a valid message.
    InvalidRequest,
    /// The method does not exist or is not available.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
    /// Server-defined error.
    ServerError(i64),
}

impl ErrorCode {
    /// Returns the numeric code for this error.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerError(code) => code,
        }
    }

    /// Returns the default message for this error code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ServerError(_) => "Server error",
        }
    }

    /// Maps a numeric code back to a known kind.
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            other => Self::ServerError(other),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// The error code.
    pub code: i64,

    /// A short description of the error.
    pub message: String,

    /// Additional information about the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    /// Creates an error carrying the code's default message.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.default_message().to_string(),
            data: None,
        }
    }

    /// Creates an error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Adds additional data to the error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The body of an unparsable message.
    #[must_use]
    pub fn parse_error() -> Self {
        Self::from_code(ErrorCode::ParseError)
    }

    /// A payload that is valid JSON but not a valid message.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidRequest, message)
    }

    /// No request handler is registered for `method`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::with_message(ErrorCode::MethodNotFound, format!("Method not found: {method}"))
    }

    /// The parameters did not have the expected shape.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidParams, message)
    }

    /// The handler failed for a reason unrelated to the request.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InternalError, message)
    }

    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// The payload of a response: a result or an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The method succeeded.
    Result(Value),
    /// The method failed.
    Error(ResponseError),
}

/// A JSON-RPC 2.0 response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version marker.
    #[serde(default)]
    pub jsonrpc: Version,

    /// The request ID this response corresponds to, `null` if unknown.
    pub id: Option<RequestId>,

    /// The result or error.
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    /// Creates a success response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: Version,
            id: Some(id),
            outcome: Outcome::Result(result),
        }
    }

    /// Creates an error response. `id` is `None` when the failing request
    /// could not be identified.
    #[must_use]
    pub fn failure(id: Option<RequestId>, error: ResponseError) -> Self {
        Self {
            jsonrpc: Version,
            id,
            outcome: Outcome::Error(error),
        }
    }

    /// Returns the result if the call succeeded.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }

    /// Returns the error if the call failed.
    #[must_use]
    pub const fn error(&self) -> Option<&ResponseError> {
        match &self.outcome {
            Outcome::Result(_) => None,
            Outcome::Error(error) => Some(error),
        }
    }
}

/// The kind of a decoded payload, as decided by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Has `method` and `id`.
    Request,
    /// Has `method` and no `id`.
    Notification,
    /// Has no `method`.
    Response,
}

/// Classifies a decoded payload.
///
/// A payload with a `method` member is a request when it also has an `id`
/// member, and a notification otherwise. Everything else is a response.
#[must_use]
pub fn classify(payload: &Value) -> MessageKind {
    match payload.as_object() {
        Some(obj) if obj.contains_key("method") => {
            if obj.contains_key("id") {
                MessageKind::Request
            } else {
                MessageKind::Notification
            }
        }
        _ => MessageKind::Response,
    }
}

/// Any JSON-RPC 2.0 message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// A request expecting a response.
    Request(Request),
    /// A one-way notification.
    Notification(Notification),
    /// A reply to an earlier request.
    Response(Response),
}

impl Message {
    /// Classifies a decoded payload and converts it into a typed message.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the payload has the members of its kind
    /// but they have the wrong types, or if a response carries neither
    /// `result` nor `error`.
    pub fn from_value(mut payload: Value) -> Result<Self, ProtocolError> {
        let kind = classify(&payload);
        let message = match kind {
            MessageKind::Request => Self::Request(serde_json::from_value(payload)?),
            MessageKind::Notification => Self::Notification(serde_json::from_value(payload)?),
            MessageKind::Response => {
                let obj = payload.as_object_mut().ok_or(ProtocolError::NotAnObject)?;
                // A non-null error wins over a stray result member; a null
                // error is no error at all.
                match obj.get("error") {
                    Some(Value::Null) => {
                        obj.remove("error");
                    }
                    Some(_) => {
                        obj.remove("result");
                    }
                    None => {}
                }
                if !obj.contains_key("result") && !obj.contains_key("error") {
                    return Err(ProtocolError::MissingOutcome);
                }
                Self::Response(serde_json::from_value(payload)?)
            }
        };
        Ok(message)
    }

    /// Returns the kind of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Request(_) => MessageKind::Request,
            Self::Notification(_) => MessageKind::Notification,
            Self::Response(_) => MessageKind::Response,
        }
    }

    /// Returns the method name, if the message has one.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(notif) => Some(&notif.method),
            Self::Response(_) => None,
        }
    }

    /// Returns the correlation ID, if the message has one.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Notification(_) => None,
            Self::Response(resp) => resp.id.as_ref(),
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(de::Error::custom)
    }
}

impl From<Request> for Message {
    fn from(value: Request) -> Self {
        Self::Request(value)
    }
}

impl From<Notification> for Message {
    fn from(value: Notification) -> Self {
        Self::Notification(value)
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Self::Response(value)
    }
}

//! framed-jsonrpc: bidirectional JSON-RPC 2.0 over `Content-Length` framed streams
//!
//! This library reassembles framed JSON-RPC messages from arbitrarily chunked
//! byte streams, dispatches them to registered handlers and correlates
//! responses with the requests that caused them. The framing is the one used
//! by the Language Server Protocol:
//!
//! ```text
//! Content-Length: 24\r\n
//! \r\n
//! {"id":"abc","result":{}}
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Configuration error types
//! - [`rpc`]: Framing, dispatch, correlation and the async transport
//! - [`service`]: Handlers served by the `framed-jsonrpc` binary
//!
//! # Example
//!
//! ```
//! use framed_jsonrpc::rpc::Session;
//! use serde_json::json;
//!
//! let mut session = Session::default();
//! session.on_request("ping", |_, _| Ok(json!({})));
//!
//! let body = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
//! let frame = format!("Content-Length: {}\r\n\r\n{body}", body.len());
//! session.feed(frame.as_bytes()).unwrap();
//!
//! let reply = session.take_outgoing().concat();
//! assert!(String::from_utf8(reply).unwrap().ends_with(r#""result":{}}"#));
//! ```

pub mod config;
pub mod error;
pub mod rpc;
pub mod service;

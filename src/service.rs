//! The handlers served by the `framed-jsonrpc` binary.
//!
//! | Method     | Kind         | Behaviour                                     |
//! |------------|--------------|-----------------------------------------------|
//! | `ping`     | request      | returns `{}`                                  |
//! | `echo`     | request      | returns its params, or `null`                 |
//! | `shutdown` | request      | returns `null`; later requests are refused    |
//! | `exit`     | notification | closes the session                            |
//!
//! Any other request is answered with "method not found".

use std::cell::Cell;
use std::rc::Rc;

use serde_json::{json, Value};
use tracing::info;

use crate::rpc::{ResponseError, Session};

/// Method names served by [`register`].
pub const METHODS: [&str; 4] = ["ping", "echo", "shutdown", "exit"];

/// Registers the built-in handlers on `session`.
pub fn register(session: &mut Session) {
    let stopping = Rc::new(Cell::new(false));

    let flag = Rc::clone(&stopping);
    session.on_request("ping", move |_, _| {
        refuse_if_stopping(&flag)?;
        Ok(json!({}))
    });

    let flag = Rc::clone(&stopping);
    session.on_request("echo", move |_, params| {
        refuse_if_stopping(&flag)?;
        Ok(params.unwrap_or(Value::Null))
    });

    let flag = Rc::clone(&stopping);
    session.on_request("shutdown", move |_, _| {
        info!("shutdown requested by peer");
        flag.set(true);
        Ok(Value::Null)
    });

    session.on_notification("exit", |cx, _| {
        info!("exit notification received");
        cx.request_shutdown();
        Ok(())
    });
}

fn refuse_if_stopping(stopping: &Cell<bool>) -> Result<(), ResponseError> {
    if stopping.get() {
        return Err(ResponseError::invalid_request("Server is shutting down"));
    }
    Ok(())
}

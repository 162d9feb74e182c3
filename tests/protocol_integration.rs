//! Integration tests for JSON-RPC 2.0 message handling.
//!
//! These tests verify classification, typed parsing and the shape of the
//! messages this crate puts on the wire.

use framed_jsonrpc::rpc::{
    classify, encode, ErrorCode, FrameDecoder, Message, MessageKind, Notification, ProtocolError,
    Request, RequestId, Response, ResponseError,
};
use serde_json::{json, Value};

// =============================================================================
// Classification Tests
// =============================================================================

#[test]
fn test_classify_by_members() {
    assert_eq!(
        classify(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})),
        MessageKind::Request
    );
    assert_eq!(
        classify(&json!({"method": "initialized"})),
        MessageKind::Notification
    );
    assert_eq!(
        classify(&json!({"id": 1, "result": null})),
        MessageKind::Response
    );
    // a null id still makes it a request
    assert_eq!(
        classify(&json!({"id": null, "method": "x"})),
        MessageKind::Request
    );
}

#[test]
fn test_classify_non_objects_as_responses() {
    assert_eq!(classify(&json!([1, 2])), MessageKind::Response);
    assert_eq!(classify(&json!("text")), MessageKind::Response);
}

// =============================================================================
// Typed Parsing Tests
// =============================================================================

#[test]
fn test_parse_initialize_request() {
    let json = r#"{
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "processId": null,
            "capabilities": {}
        }
    }"#;

    let message: Message = serde_json::from_str(json).unwrap();
    if let Message::Request(req) = message {
        assert_eq!(req.method, "initialize");
        assert_eq!(req.id, RequestId::Number(1));
        assert_eq!(req.params.unwrap()["capabilities"], json!({}));
    } else {
        panic!("Expected Request");
    }
}

#[test]
fn test_parse_notification_without_version() {
    let message = Message::from_value(json!({"method": "exit"})).unwrap();
    assert_eq!(message.kind(), MessageKind::Notification);
    assert_eq!(message.method(), Some("exit"));
    assert!(message.id().is_none());
}

#[test]
fn test_parse_error_response() {
    let message = Message::from_value(json!({
        "jsonrpc": "2.0",
        "id": "abc",
        "error": {"code": -32601, "message": "Method not found: foo", "data": [1]}
    }))
    .unwrap();

    let Message::Response(resp) = message else {
        panic!("Expected Response");
    };
    assert_eq!(resp.id, Some(RequestId::from("abc")));
    let error = resp.error().unwrap();
    assert_eq!(error.kind(), ErrorCode::MethodNotFound);
    assert_eq!(error.data, Some(json!([1])));
    assert!(resp.result().is_none());
}

#[test]
fn test_error_wins_over_stray_result() {
    let message = Message::from_value(json!({
        "id": 5,
        "result": "ignored",
        "error": {"code": -32000, "message": "busy"}
    }))
    .unwrap();

    let Message::Response(resp) = message else {
        panic!("Expected Response");
    };
    assert_eq!(resp.error().map(|e| e.code), Some(-32000));
}

#[test]
fn test_response_without_outcome_is_rejected() {
    let err = Message::from_value(json!({"id": 1})).unwrap_err();
    assert!(matches!(err, ProtocolError::MissingOutcome));

    let err = Message::from_value(json!(42)).unwrap_err();
    assert!(matches!(err, ProtocolError::NotAnObject));
}

#[test]
fn test_request_with_bad_member_types_is_rejected() {
    let err = Message::from_value(json!({"id": 1.5, "method": "x"})).unwrap_err();
    assert!(matches!(err, ProtocolError::Shape(_)));

    let err = Message::from_value(json!({"method": 3})).unwrap_err();
    assert!(matches!(err, ProtocolError::Shape(_)));
}

// =============================================================================
// Wire Shape Tests
// =============================================================================

fn wire(bytes: &[u8]) -> Value {
    let mut decoder = FrameDecoder::new();
    decoder.feed(bytes).next().unwrap().unwrap()
}

#[test]
fn test_request_wire_shape() {
    let frame = encode(&Request::with_id("r1", "textDocument/hover", Some(json!([1])))).unwrap();
    assert_eq!(
        wire(&frame),
        json!({"jsonrpc": "2.0", "id": "r1", "method": "textDocument/hover", "params": [1]})
    );
}

#[test]
fn test_absent_params_are_omitted() {
    let frame = encode(&Notification::new("exit", None)).unwrap();
    let value = wire(&frame);
    assert_eq!(value, json!({"jsonrpc": "2.0", "method": "exit"}));
}

#[test]
fn test_success_response_has_no_error_member() {
    let frame = encode(&Response::success(RequestId::Number(9), Value::Null)).unwrap();
    let value = wire(&frame);
    assert_eq!(value, json!({"jsonrpc": "2.0", "id": 9, "result": null}));
}

#[test]
fn test_failure_response_has_null_id_when_unknown() {
    let frame = encode(&Response::failure(None, ResponseError::parse_error())).unwrap();
    let value = wire(&frame);
    assert_eq!(value["id"], Value::Null);
    assert_eq!(value["error"]["code"], -32700);
    assert!(value.get("result").is_none());
}

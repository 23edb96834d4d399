#![cfg(feature = "openai")]

use std::time::Duration;

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use strand::config::BackendConfig;
use strand::error::StrandError;
use strand::provider::{
    CapabilityTable, ChatBackend, ChatRequest, EventStream, OpenAiCompatibleBackend,
};
use strand::tools::{ParameterBuilder, ToolSpec};
use strand::types::{Message, StreamEvent, ToolCallAccumulator, ToolCallDelta};
use strand::util::RetryPolicy;

fn test_retry_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(1),
        multiplier: 1.0,
    }
}

fn backend(server: &MockServer) -> OpenAiCompatibleBackend {
    OpenAiCompatibleBackend::new(BackendConfig::new(server.uri(), "test-key", "gpt-test"))
        .expect("backend")
        .with_retry_policy(test_retry_policy(1))
}

fn first_party_backend(server: &MockServer) -> OpenAiCompatibleBackend {
    backend(server).with_capabilities(CapabilityTable::default().with_first_party_host("127.0.0.1"))
}

fn sse(lines: &[&str]) -> String {
    let mut body = lines.join("\n\n");
    body.push_str("\n\n");
    body
}

fn request() -> ChatRequest {
    ChatRequest::builder()
        .messages(vec![Message::user("what time is it?")])
        .tools(vec![ToolSpec::new(
            "get_time",
            "Current time",
            ParameterBuilder::new().string("tz", "Time zone", false).build(),
        )])
        .build()
}

async fn drain(stream: EventStream) -> Vec<Result<StreamEvent, StrandError>> {
    stream.collect().await
}

async fn drain_ok(stream: EventStream) -> Vec<StreamEvent> {
    drain(stream)
        .await
        .into_iter()
        .map(|item| item.expect("stream item"))
        .collect()
}

const TOOL_CALL_STREAM: &[&str] = &[
    r#"data: {"choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"}}]}"#,
    r#"data: {"choices":[{"index":0,"delta":{"content":"lo"}}]}"#,
    ": keepalive",
    "data: not-json",
    r#"data: {"choices":[{"index":0,"delta":{}}]}"#,
    r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"get_time","arguments":"{\"tz\""}}]}}]}"#,
    r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":":\"UTC\"}"}}]},"finish_reason":"tool_calls"}]}"#,
    "data: [DONE]",
];

#[tokio::test]
async fn raw_stream_maps_text_tool_calls_and_finish_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-test",
            "stream": true,
            "tools": [{"type": "function", "function": {"name": "get_time"}}]
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse(TOOL_CALL_STREAM), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let stream = backend(&server).stream(&request()).await.expect("stream");
    let events = drain_ok(stream).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::text("Hel"),
            StreamEvent::text("lo"),
            StreamEvent::text(""),
            StreamEvent::ToolCallDelta(ToolCallDelta {
                index: 0,
                tool_call_id: Some("call_1".into()),
                name: Some("get_time".into()),
                arguments_delta: Some("{\"tz\"".into()),
            }),
            StreamEvent::ToolCallDelta(ToolCallDelta {
                index: 0,
                tool_call_id: None,
                name: None,
                arguments_delta: Some(":\"UTC\"}".into()),
            }),
            StreamEvent::done_with("tool_calls"),
        ]
    );

    let mut calls = ToolCallAccumulator::new();
    for event in &events {
        if let StreamEvent::ToolCallDelta(delta) = event {
            calls.apply(delta);
        }
    }
    let call = calls.into_complete()[0].to_tool_call().expect("complete call");
    assert_eq!(call.id, "call_1");
    assert_eq!(call.arguments_json, r#"{"tz":"UTC"}"#);
}

#[tokio::test]
async fn legacy_function_call_streams_as_index_zero() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse(&[
                r#"data: {"choices":[{"delta":{"function_call":{"name":"get_time","arguments":""}}}]}"#,
                r#"data: {"choices":[{"delta":{"function_call":{"arguments":"{}"}},"finish_reason":"function_call"}]}"#,
                "data: [DONE]",
            ]),
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let stream = backend(&server).stream(&request()).await.expect("stream");
    let events = drain_ok(stream).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::ToolCallDelta(ToolCallDelta {
                index: 0,
                tool_call_id: None,
                name: Some("get_time".into()),
                arguments_delta: None,
            }),
            StreamEvent::ToolCallDelta(ToolCallDelta {
                index: 0,
                tool_call_id: None,
                name: None,
                arguments_delta: Some("{}".into()),
            }),
            StreamEvent::done_with("function_call"),
        ]
    );
}

#[tokio::test]
async fn stream_without_done_marker_still_ends_with_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse(&[r#"data: {"choices":[{"delta":{"content":"partial"}}]}"#]),
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let stream = backend(&server).stream(&request()).await.expect("stream");
    assert_eq!(
        drain_ok(stream).await,
        vec![StreamEvent::text("partial"), StreamEvent::done(None)]
    );
}

#[tokio::test]
async fn managed_stream_is_used_for_first_party_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse(&[
                r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#,
                r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
                "data: [DONE]",
            ]),
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let stream = first_party_backend(&server)
        .stream(&request())
        .await
        .expect("stream");
    assert_eq!(
        drain_ok(stream).await,
        vec![
            StreamEvent::text("Hi"),
            StreamEvent::text(""),
            StreamEvent::done_with("stop"),
        ]
    );
}

#[tokio::test]
async fn unrecognized_stream_shape_falls_back_to_raw_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse(&[
                r#"data: {"choices":[{"delta":{"content":"fallback"}}]}"#,
                r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
                "data: [DONE]",
            ]),
            "text/plain",
        ))
        .expect(2)
        .mount(&server)
        .await;

    let stream = first_party_backend(&server)
        .stream(&request())
        .await
        .expect("stream");
    assert_eq!(
        drain_ok(stream).await,
        vec![
            StreamEvent::text("fallback"),
            StreamEvent::text(""),
            StreamEvent::done_with("stop"),
        ]
    );
}

#[tokio::test]
async fn shape_failure_after_first_chunk_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse(&[
                r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#,
                "data: not-json",
            ]),
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let stream = first_party_backend(&server)
        .stream(&request())
        .await
        .expect("stream");
    let items = drain(stream).await;

    assert_eq!(items.len(), 2);
    assert!(matches!(&items[0], Ok(event) if *event == StreamEvent::text("Hi")));
    assert!(matches!(&items[1], Err(StrandError::Stream(_))));
}

#[tokio::test]
async fn rejected_key_surfaces_as_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let stream = backend(&server).stream(&request()).await.expect("stream");
    let items = drain(stream).await;

    assert_eq!(items.len(), 1);
    match &items[0] {
        Err(StrandError::Authentication(message)) => assert_eq!(message, "bad key"),
        other => panic!("expected authentication error, got {other:?}"),
    }
}

#[tokio::test]
async fn server_errors_are_retried_before_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse(&[r#"data: {"choices":[{"delta":{"content":"ok"}}]}"#, "data: [DONE]"]),
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let stream = backend(&server)
        .with_retry_policy(test_retry_policy(2))
        .stream(&request())
        .await
        .expect("stream");
    assert_eq!(
        drain_ok(stream).await,
        vec![StreamEvent::text("ok"), StreamEvent::done(None)]
    );
}

#[tokio::test]
async fn complete_returns_text_and_finish_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"model": "gpt-test"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {"role": "assistant", "content": "It is noon."},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = backend(&server)
        .complete(&ChatRequest::new(vec![Message::user("time?")]))
        .await
        .expect("completion");

    assert_eq!(response.output_text, "It is noon.");
    assert_eq!(response.finish_reason.as_deref(), Some("stop"));

    let received = server.received_requests().await.expect("recorded requests");
    let body: serde_json::Value = received[0].body_json().expect("json body");
    assert!(body.get("stream").is_none());
    assert!(body.get("tools").is_none());
}

#[tokio::test]
async fn complete_maps_status_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;

    let err = backend(&server)
        .complete(&ChatRequest::new(vec![Message::user("time?")]))
        .await
        .expect_err("400 should fail");

    match err {
        StrandError::Api { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "bad request");
        }
        other => panic!("expected api error, got {other:?}"),
    }
}

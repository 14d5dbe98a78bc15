// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! End-to-end gateway tests: canonical calls, streaming turns, and the
//! conversation store working together against mock backends

use async_trait::async_trait;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use switchboard::config::Settings;
use switchboard::error::SwitchboardError;
use switchboard::gateway::{Gateway, GenerateRequest, StreamTurn};
use switchboard::llm::message::{ResponseFormat, Role};
use switchboard::relay::{FrameSink, RelayState, SinkClosed, WireFrame};
use switchboard::store::ConversationStore;

struct VecSink(Vec<WireFrame>);

#[async_trait]
impl FrameSink for VecSink {
    async fn send(&mut self, frame: WireFrame) -> Result<(), SinkClosed> {
        self.0.push(frame);
        Ok(())
    }
}

fn gateway_against(server: &MockServer) -> Gateway {
    let mut settings = Settings::default();
    settings.providers.openai.api_key = Some("test-key".to_string());
    settings.providers.openai.base_url = Some(format!("{}/v1/chat/completions", server.uri()));
    settings.defaults.provider = "openai".to_string();
    settings.defaults.model = "gpt-4o-mini".to_string();
    settings.storage.attachment_dir = std::env::temp_dir().join("switchboard-test-attachments");
    let store = Arc::new(ConversationStore::open_in_memory().unwrap());
    Gateway::with_store(settings, store)
}

fn completion_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-1",
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

fn sse_body(chunks: &[&str]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        let frame = serde_json::json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "delta": {"role": "assistant", "content": chunk},
                "finish_reason": null
            }]
        });
        body.push_str(&format!("data: {frame}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn generate_plain_text_appends_assistant_once() {
    // Scenario: "What is 2+2?" with PlainText and no history
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("4")))
        .expect(1)
        .mount(&server)
        .await;

    let gw = gateway_against(&server);
    let response = gw.generate(GenerateRequest::new("What is 2+2?")).await.unwrap();

    assert_eq!(response.content.as_text(), Some("4"));
    assert_eq!(response.messages.len(), 3);
    assert_eq!(response.messages[0].role, Role::System);
    assert_eq!(response.messages[1].role, Role::User);
    assert_eq!(response.messages[2].role, Role::Assistant);
    assert_eq!(response.messages[2].text(), "4");
    assert!(response.warnings.is_empty());
}

#[tokio::test]
async fn generate_freeform_json_decodes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion_body(r#"{"answer": 4}"#)),
        )
        .mount(&server)
        .await;

    let gw = gateway_against(&server);
    let response = gw
        .generate(GenerateRequest::new("2+2 as json").with_format(ResponseFormat::JsonFreeform))
        .await
        .unwrap();

    assert_eq!(response.content.as_json().unwrap()["answer"], 4);
}

#[tokio::test]
async fn generate_freeform_json_malformed_is_recoverable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("four")))
        .mount(&server)
        .await;

    let gw = gateway_against(&server);
    let err = gw
        .generate(GenerateRequest::new("2+2 as json").with_format(ResponseFormat::JsonFreeform))
        .await
        .unwrap_err();

    // The raw text rides along so the caller can degrade to plain text
    assert!(err.is_recoverable());
    assert_eq!(err.raw_text(), Some("four"));
}

#[tokio::test]
async fn generate_schema_validates_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body(r#"{"answer": "four"}"#)),
        )
        .mount(&server)
        .await;

    let gw = gateway_against(&server);
    let schema = serde_json::json!({
        "type": "object",
        "properties": {"answer": {"type": "number"}},
        "required": ["answer"]
    });
    let err = gw
        .generate(GenerateRequest::new("2+2").with_format(ResponseFormat::JsonSchema(schema)))
        .await
        .unwrap_err();

    assert!(matches!(err, SwitchboardError::SchemaViolation { .. }));
    assert_eq!(err.raw_text(), Some(r#"{"answer": "four"}"#));
}

#[tokio::test]
async fn reasoning_model_with_schema_makes_no_network_call() {
    let server = MockServer::start().await;
    // Zero expected requests: the capability check fires before dispatch
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("nope")))
        .expect(0)
        .mount(&server)
        .await;

    let gw = gateway_against(&server);
    let err = gw
        .generate(
            GenerateRequest::new("2+2")
                .with_model("o1-mini")
                .with_format(ResponseFormat::JsonSchema(serde_json::json!({
                    "type": "object"
                }))),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SwitchboardError::UnsupportedFormatForModel { .. }
    ));
}

#[tokio::test]
async fn generate_with_history_appends_user_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "one"},
                {"role": "user", "content": "second"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("two")))
        .expect(1)
        .mount(&server)
        .await;

    let gw = gateway_against(&server);
    let history = vec![
        switchboard::llm::message::Message::system("sys"),
        switchboard::llm::message::Message::user("first"),
        switchboard::llm::message::Message::assistant("one"),
    ];
    let response = gw
        .generate(GenerateRequest::new("second").with_messages(history))
        .await
        .unwrap();

    assert_eq!(response.messages.len(), 5);
    assert_eq!(response.messages[4].text(), "two");
}

#[tokio::test]
async fn streaming_turn_relays_frames_and_persists() {
    // Scenario: chunks ["Hel", "lo"] push two content frames then one stop
    // frame, and the store's final content equals "Hello"
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(&["Hel", "lo"]), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let gw = gateway_against(&server);
    let mut sink = VecSink(Vec::new());
    let outcome = gw
        .run_streaming_turn(
            StreamTurn::new("conv-1", "say hello").with_directory("/proj"),
            &mut sink,
        )
        .await
        .unwrap();

    assert_eq!(outcome.state, RelayState::Completed);
    assert_eq!(outcome.content, "Hello");

    // Two content frames then the terminal sentinel
    let content_frames = sink
        .0
        .iter()
        .filter(|f| matches!(f, WireFrame::Content { .. }))
        .count();
    assert_eq!(content_frames, 2);
    assert_eq!(sink.0.last(), Some(&WireFrame::MessageStop));

    // The conversation holds exactly the user turn and the assistant turn
    let messages = gw.store().list("conv-1").unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "say hello");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hello");
    assert_eq!(messages[1].message_id, outcome.message_id);
    assert_eq!(messages[1].provider.as_deref(), Some("openai"));
    assert_eq!(messages[1].directory_path.as_deref(), Some("/proj"));
}

#[tokio::test]
async fn streaming_turn_second_round_reuses_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "Hello"},
                {"role": "user", "content": "again"}
            ]
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body(&["Bye"]), "text/event-stream"),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(&["Hel", "lo"]), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let gw = gateway_against(&server);
    let mut sink = VecSink(Vec::new());
    gw.run_streaming_turn(StreamTurn::new("conv-1", "first"), &mut sink)
        .await
        .unwrap();

    let mut sink = VecSink(Vec::new());
    let outcome = gw
        .run_streaming_turn(StreamTurn::new("conv-1", "again"), &mut sink)
        .await
        .unwrap();

    assert_eq!(outcome.content, "Bye");
    let messages = gw.store().list("conv-1").unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[3].content, "Bye");
}

#[tokio::test]
async fn streaming_turn_persists_attachment_with_unknown_extension() {
    // Boundary: an unrecognized extension classifies as "other" and is
    // still persisted with correct size metadata
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body(&["ok"]), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let temp = tempfile::TempDir::new().unwrap();
    let blob = temp.path().join("payload.xyz");
    std::fs::write(&blob, b"12345").unwrap();

    let gw = gateway_against(&server);
    let mut sink = VecSink(Vec::new());
    gw.run_streaming_turn(
        StreamTurn::new("conv-1", "take this").with_attachment(&blob),
        &mut sink,
    )
    .await
    .unwrap();

    let messages = gw.store().list("conv-1").unwrap();
    let user_row = &messages[0];
    let attachments = gw.store().attachments_for(&user_row.message_id).unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].name, "payload.xyz");
    assert_eq!(attachments[0].kind, switchboard::attachments::MediaKind::Other);
    assert_eq!(attachments[0].size, 5);
}

#[tokio::test]
async fn streaming_turn_failed_dispatch_leaves_no_assistant_row() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "error": {"message": "boom", "code": "server_error"}
        })))
        .mount(&server)
        .await;

    let gw = gateway_against(&server);
    let mut sink = VecSink(Vec::new());
    let err = gw
        .run_streaming_turn(StreamTurn::new("conv-1", "hello"), &mut sink)
        .await
        .unwrap_err();
    assert!(err.is_recoverable());

    // The user turn is recorded, but no empty assistant row dangles
    let messages = gw.store().list("conv-1").unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
    assert!(sink.0.is_empty());
}

#[tokio::test]
async fn generate_stream_returns_lazy_chunks() {
    use futures::StreamExt;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(&["a", "b", "c"]), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let gw = gateway_against(&server);
    let mut stream = gw
        .generate_stream(GenerateRequest::new("spell abc"))
        .await
        .unwrap();

    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk.unwrap().content);
    }
    assert_eq!(text, "abc");
}

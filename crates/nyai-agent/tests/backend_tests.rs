// Backends and the AutoRAG client against a local stub server.

use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use nyai_agent::{AnthropicBackend, AutoRagClient, OllamaBackend};
use nyai_core::{
    flow::{FlowBackend, FlowKind, FlowRequest},
    retrieval::Retriever,
    types::RetrievalResult,
};
use serde_json::{json, Value};
use tracing_test::traced_test;

// ── stub server ──────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Seen {
    bodies: Arc<Mutex<Vec<Value>>>,
    headers: Arc<Mutex<Vec<HeaderMap>>>,
}

impl Seen {
    fn last_body(&self) -> Value {
        self.bodies.lock().unwrap().last().cloned().unwrap()
    }

    fn last_header(&self, name: &str) -> Option<String> {
        self.headers
            .lock()
            .unwrap()
            .last()
            .and_then(|h| h.get(name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

/// Serve `path` with a fixed status and JSON reply; returns the base URL.
async fn stub(path: &str, status: StatusCode, reply: Value) -> (String, Seen) {
    let seen = Seen::default();
    let app = Router::new()
        .route(
            path,
            post(
                move |State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| {
                    let reply = reply.clone();
                    async move {
                        seen.bodies.lock().unwrap().push(body);
                        seen.headers.lock().unwrap().push(headers);
                        (status, Json(reply))
                    }
                },
            ),
        )
        .with_state(seen.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), seen)
}

fn json_request(kind: FlowKind) -> FlowRequest {
    FlowRequest {
        kind,
        system_prompt: "You are a legal research assistant.".into(),
        prompt: "Identify laws for: cheque bounce".into(),
    }
}

// ── ollama ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ollama_sends_chat_request_and_returns_content() {
    let (base, seen) = stub(
        "/api/chat",
        StatusCode::OK,
        json!({"message": {"role": "assistant", "content": "{\"laws\": [\"NI Act s.138\"]}"}}),
    )
    .await;
    let backend = OllamaBackend::new(base, "llama3.1").with_timeout(5);

    let out = backend.complete(&json_request(FlowKind::IdentifyLaws)).await.unwrap();

    assert_eq!(out, "{\"laws\": [\"NI Act s.138\"]}");
    let body = seen.last_body();
    assert_eq!(body["model"], "llama3.1");
    assert_eq!(body["stream"], false);
    assert_eq!(body["format"], "json");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "Identify laws for: cheque bounce");
}

#[tokio::test]
async fn ollama_skips_empty_system_prompt() {
    let (base, seen) = stub(
        "/api/chat",
        StatusCode::OK,
        json!({"message": {"content": "plain"}}),
    )
    .await;
    let backend = OllamaBackend::new(base, "llama3.1");
    let mut req = json_request(FlowKind::SummarizeDocument);
    req.system_prompt.clear();

    backend.complete(&req).await.unwrap();

    let body = seen.last_body();
    assert_eq!(body["format"], "json");
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    assert_eq!(body["messages"][0]["role"], "user");
}

#[tokio::test]
#[traced_test]
async fn ollama_non_success_is_an_error() {
    let (base, _) = stub(
        "/api/chat",
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({"error": "model not loaded"}),
    )
    .await;
    let backend = OllamaBackend::new(base, "llama3.1");

    let err = backend
        .complete(&json_request(FlowKind::GenerateChecklist))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("500"));
    assert!(err.to_string().contains("model not loaded"));
    assert!(logs_contain("ollama returned non-200"));
}

#[tokio::test]
async fn ollama_unreachable_is_an_error() {
    // Nothing listens on the discard port.
    let backend = OllamaBackend::new("http://127.0.0.1:9", "llama3.1").with_timeout(2);
    assert!(backend.complete(&json_request(FlowKind::IdentifyLaws)).await.is_err());
}

// ── anthropic ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn anthropic_sends_headers_and_system_prompt() {
    let (base, seen) = stub(
        "/v1/messages",
        StatusCode::OK,
        json!({"content": [{"type": "text", "text": "{\"citation\": \"AIR 1950 SC 27\"}"}]}),
    )
    .await;
    let backend = AnthropicBackend::new("test-key", "claude-sonnet-4-5").with_base_url(base);

    let out = backend.complete(&json_request(FlowKind::EnhanceCitation)).await.unwrap();

    assert_eq!(out, "{\"citation\": \"AIR 1950 SC 27\"}");
    assert_eq!(seen.last_header("x-api-key").as_deref(), Some("test-key"));
    assert_eq!(seen.last_header("anthropic-version").as_deref(), Some("2023-06-01"));
    let body = seen.last_body();
    assert_eq!(body["system"], "You are a legal research assistant.");
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(backend.model(), "claude-sonnet-4-5");
}

#[tokio::test]
async fn anthropic_error_status_is_an_error() {
    let (base, _) = stub(
        "/v1/messages",
        StatusCode::TOO_MANY_REQUESTS,
        json!({"type": "error", "error": {"type": "rate_limit_error"}}),
    )
    .await;
    let backend = AnthropicBackend::new("k", "m").with_base_url(base);

    let err = backend
        .complete(&json_request(FlowKind::IdentifyLaws))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("429"));
}

// ── autorag ──────────────────────────────────────────────────────────────────

const SEARCH_PATH: &str = "/accounts/acct/autorag/rags/nyai-rag/ai-search";

#[tokio::test]
async fn autorag_success_returns_response_text() {
    let (base, seen) = stub(
        SEARCH_PATH,
        StatusCode::OK,
        json!({"success": true, "result": {"response": "Section 138 of the NI Act..."}, "errors": []}),
    )
    .await;
    let client = AutoRagClient::new("acct", "nyai-rag", "tok").with_base_url(base);

    let out = client.retrieve("cheque bounce").await;

    assert_eq!(
        out,
        RetrievalResult::Success {
            raw_text_response: "Section 138 of the NI Act...".into()
        }
    );
    assert_eq!(seen.last_body()["query"], "cheque bounce");
    assert_eq!(seen.last_header("authorization").as_deref(), Some("Bearer tok"));
}

#[tokio::test]
async fn autorag_reported_failure_becomes_error() {
    let (base, _) = stub(
        SEARCH_PATH,
        StatusCode::OK,
        json!({"success": false, "errors": [{"code": 7003, "message": "rag not found"}]}),
    )
    .await;
    let client = AutoRagClient::new("acct", "nyai-rag", "tok").with_base_url(base);

    match client.retrieve("q").await {
        RetrievalResult::Error { message, details } => {
            assert_eq!(message, "rag not found");
            assert_eq!(details.unwrap()[0]["code"], 7003);
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn autorag_http_error_keeps_body_as_details() {
    let (base, _) = stub(
        SEARCH_PATH,
        StatusCode::UNAUTHORIZED,
        json!({"success": false, "errors": [{"message": "bad token"}]}),
    )
    .await;
    let client = AutoRagClient::new("acct", "nyai-rag", "tok").with_base_url(base);

    match client.retrieve("q").await {
        RetrievalResult::Error { message, details } => {
            assert!(message.contains("401"));
            assert_eq!(details.unwrap()["errors"][0]["message"], "bad token");
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn autorag_missing_configuration_makes_no_request() {
    let client = AutoRagClient::new("acct", "", "").with_base_url("http://127.0.0.1:9");

    match client.retrieve("q").await {
        RetrievalResult::Error { details, .. } => {
            let missing = details.unwrap()["missing"].clone();
            assert_eq!(
                missing,
                json!(["CLOUDFLARE_AUTORAG_NAME", "CLOUDFLARE_API_TOKEN"])
            );
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn autorag_success_without_result_is_empty_text() {
    let (base, _) = stub(SEARCH_PATH, StatusCode::OK, json!({"success": true})).await;
    let client = AutoRagClient::new("acct", "nyai-rag", "tok").with_base_url(base);

    assert_eq!(
        client.retrieve("q").await,
        RetrievalResult::Success {
            raw_text_response: String::new()
        }
    );
}

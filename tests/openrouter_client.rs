//! OpenRouter transport against a local mock server.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use selfloom::domain::{Document, LoomEvent, RunState};
use selfloom::llm::{CompletionRequest, ErrorClass, LlmClient, LlmError, OpenRouterClient, OpenRouterConfig};
use selfloom::loom::{BackoffPolicy, CompletionRequester, EventSink, GenerationParams, LoopController};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_body(chunks: &[&str]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        let data = json!({ "choices": [{ "text": chunk }] });
        body.push_str(&format!("data: {}\n\n", data));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

fn client_for(server: &MockServer) -> OpenRouterClient {
    OpenRouterClient::with_api_key("sk-test", OpenRouterConfig::with_base_url(server.uri())).unwrap()
}

fn fast_policy() -> BackoffPolicy {
    BackoffPolicy {
        initial_delay: Duration::from_millis(10),
        multiplier: 2.0,
        max_delay: Duration::from_millis(100),
        max_jitter: Duration::ZERO,
    }
}

async fn collect(client: &OpenRouterClient, request: &CompletionRequest) -> Vec<Result<String, LlmError>> {
    client.complete_stream(request).await.unwrap().collect().await
}

#[tokio::test]
async fn stream_yields_deltas_until_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "base",
            "prompt": "Once upon a time",
            "stream": true,
            "max_tokens": 16
        })))
        .respond_with(sse_response(sse_body(&["Hel", "lo", " there"])))
        .mount(&server)
        .await;

    let request = CompletionRequest::new("base", "Once upon a time").with_max_tokens(16);
    let chunks: Vec<String> = collect(&client_for(&server), &request)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(chunks, ["Hel", "lo", " there"]);
}

#[tokio::test]
async fn stream_auth_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .mount(&server)
        .await;

    let results = collect(&client_for(&server), &CompletionRequest::new("base", "x")).await;

    assert_eq!(results.len(), 1);
    let err = results.into_iter().next().unwrap().unwrap_err();
    assert!(err.is_fatal(), "{:?}", err);
}

#[tokio::test]
async fn stream_rate_limit_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let results = collect(&client_for(&server), &CompletionRequest::new("base", "x")).await;

    match results.into_iter().next() {
        Some(Err(LlmError::RateLimited { retry_after })) => assert_eq!(retry_after, Duration::from_secs(7)),
        other => panic!("Expected rate limit, got {:?}", other),
    }
}

#[tokio::test]
async fn stream_in_band_error_keeps_code() {
    let server = MockServer::start().await;
    let body = format!(
        "data: {}\n\ndata: {}\n\n",
        json!({ "choices": [{ "text": "partial" }] }),
        json!({ "error": { "code": 502, "message": "upstream went away" } })
    );
    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let results = collect(&client_for(&server), &CompletionRequest::new("base", "x")).await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().unwrap(), "partial");
    let err = results[1].as_ref().unwrap_err();
    assert!(matches!(err, LlmError::ApiError { status: 502, .. }));
    assert_eq!(err.class(), ErrorClass::Transient);
}

#[tokio::test]
async fn complete_returns_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "grader",
            "messages": [{ "role": "user", "content": "pick one" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": " 3\n" } }]
        })))
        .mount(&server)
        .await;

    let reply = client_for(&server)
        .complete(&CompletionRequest::new("grader", "pick one"))
        .await
        .unwrap();

    assert_eq!(reply, " 3\n");
}

#[tokio::test]
async fn complete_classifies_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .complete(&CompletionRequest::new("grader", "x"))
        .await
        .unwrap_err();

    assert!(matches!(err, LlmError::ApiError { status: 503, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn requester_recovers_after_three_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(sse_response(sse_body(&["made", " it"])))
        .with_priority(2)
        .mount(&server)
        .await;

    let client: Arc<dyn LlmClient> = Arc::new(client_for(&server));
    let requester = CompletionRequester::new(client, fast_policy());
    let cancel = CancellationToken::new();
    let (sink, mut rx) = EventSink::channel(64, cancel.clone());

    let candidate = requester
        .request(1, &CompletionRequest::new("base", "x"), &sink, &cancel)
        .await
        .unwrap();
    drop(sink);

    assert_eq!(candidate.final_text(), "made it");
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(
        events.last(),
        Some(&LoomEvent::CompletionDone {
            index: 1,
            text: "made it".to_string()
        })
    );
    assert!(!events.iter().any(|e| matches!(e, LoomEvent::Error { .. })));
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn controller_runs_against_http_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/completions"))
        .respond_with(sse_response(sse_body(&[" and", " then"])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "2" } }]
        })))
        .mount(&server)
        .await;

    let client: Arc<dyn LlmClient> = Arc::new(client_for(&server));
    let mut controller = LoopController::new(client).with_policy(fast_policy());
    let params = GenerationParams {
        candidate_count: 2,
        generation_model: "base".to_string(),
        grading_model: "grader".to_string(),
        naming_interval: 0,
        max_iterations: Some(2),
        ..Default::default()
    };
    let cancel = CancellationToken::new();
    let (sink, mut rx) = EventSink::channel(256, cancel.clone());

    let run = tokio::spawn(async move { controller.run(Document::new("http", "Seed"), params, sink, cancel).await });
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let report = run.await.unwrap().unwrap();

    assert_eq!(report.state, RunState::Stopped);
    assert_eq!(report.iterations, 2);
    assert_eq!(report.document.text, "Seed and then and then");
    assert_eq!(
        events.last(),
        Some(&LoomEvent::TextUpdated {
            full_text: "Seed and then and then".to_string()
        })
    );
}

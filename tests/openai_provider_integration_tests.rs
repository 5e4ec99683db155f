//! HTTP-level integration tests for [`airank_core::providers::openai::OpenAiProvider`].
//!
//! Exercises the provider against a [`wiremock::MockServer`] instead of the
//! real OpenAI API, covering batch submit/poll/fetch happy paths and the
//! 401/429 error mappings in [`handle_response_status`].

use airank_core::config::OpenAiCredentials;
use airank_core::model_catalog::find;
use airank_core::providers::openai::OpenAiProvider;
use airank_core::providers::BatchProvider;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_credentials() -> OpenAiCredentials {
    OpenAiCredentials {
        api_key: "test-key".to_string(),
    }
}

#[tokio::test]
async fn submit_batch_uploads_file_then_creates_batch() {
    let mock_server = MockServer::start().await;
    let provider = OpenAiProvider::with_base_url(test_credentials(), mock_server.uri()).unwrap();

    Mock::given(method("POST"))
        .and(path("/files"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "file-abc" })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/batches"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "batch-123" })))
        .mount(&mock_server)
        .await;

    let model = find("gpt-4o").unwrap();
    let line = provider.build_request_line("req-1", model, "hello").unwrap();

    let provider_batch_id = provider.submit_batch(&[line]).await.unwrap();

    assert_eq!(provider_batch_id, "batch-123");
}

#[tokio::test]
async fn poll_batch_maps_in_progress_states() {
    let mock_server = MockServer::start().await;
    let provider = OpenAiProvider::with_base_url(test_credentials(), mock_server.uri()).unwrap();

    Mock::given(method("GET"))
        .and(path("/batches/batch-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "in_progress",
            "output_file_id": null,
            "error_file_id": null,
            "errors": null,
        })))
        .mount(&mock_server)
        .await;

    let poll = provider.poll_batch("batch-123").await.unwrap();

    assert_eq!(poll.status, airank_core::domain::BatchStatus::InProgress);
    assert!(poll.error.is_none());
}

#[tokio::test]
async fn fetch_results_downloads_and_decodes_output_file() {
    let mock_server = MockServer::start().await;
    let provider = OpenAiProvider::with_base_url(test_credentials(), mock_server.uri()).unwrap();

    Mock::given(method("GET"))
        .and(path("/batches/batch-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "completed",
            "output_file_id": "file-out",
            "error_file_id": null,
            "errors": null,
        })))
        .mount(&mock_server)
        .await;

    let line = serde_json::json!({
        "custom_id": "req-1",
        "response": {
            "body": {
                "choices": [{"message": {"role": "assistant", "content": "hello back"}}],
                "usage": {"total_tokens": 7},
            }
        },
        "error": null,
    })
    .to_string();

    Mock::given(method("GET"))
        .and(path("/files/file-out/content"))
        .respond_with(ResponseTemplate::new(200).set_body_string(line))
        .mount(&mock_server)
        .await;

    let results = provider.fetch_results("batch-123").await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].custom_id, "req-1");
    assert_eq!(results[0].text.as_deref(), Some("hello back"));
    assert_eq!(results[0].token_count, Some(7));
}

#[tokio::test]
async fn complete_sync_returns_authentication_failed_on_401() {
    let mock_server = MockServer::start().await;
    let provider = OpenAiProvider::with_base_url(test_credentials(), mock_server.uri()).unwrap();

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&mock_server)
        .await;

    let model = find("gpt-4o").unwrap();
    let result = provider.complete_sync(model, "hello").await;

    assert!(matches!(result, Err(airank_core::error::CoreError::AuthenticationFailed { .. })));
}

#[tokio::test]
async fn complete_sync_returns_rate_limit_exceeded_on_429() {
    let mock_server = MockServer::start().await;
    let provider = OpenAiProvider::with_base_url(test_credentials(), mock_server.uri()).unwrap();

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
        .mount(&mock_server)
        .await;

    let model = find("gpt-4o").unwrap();
    let result = provider.complete_sync(model, "hello").await;

    match result {
        Err(airank_core::error::CoreError::RateLimitExceeded { retry_after_seconds }) => {
            assert_eq!(retry_after_seconds, 12);
        }
        other => panic!("expected rate limit error, got {other:?}"),
    }
}

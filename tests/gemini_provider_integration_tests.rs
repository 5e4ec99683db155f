//! HTTP-level integration tests for [`airank_core::providers::gemini::GeminiProvider`].
//!
//! Exercises the provider against a [`wiremock::MockServer`] in place of
//! Vertex AI, covering batch job submit/poll/fetch and the 401/429 error
//! mappings shared with the OpenAI provider.

use airank_core::config::GcpCredentials;
use airank_core::model_catalog::find;
use airank_core::providers::gemini::GeminiProvider;
use airank_core::providers::BatchProvider;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_credentials() -> GcpCredentials {
    GcpCredentials {
        project_id: "test-project".to_string(),
        region: "us-central1".to_string(),
        batch_bucket: None,
        pubsub_topic: None,
        pubsub_subscription: None,
    }
}

#[tokio::test]
async fn submit_batch_returns_job_name() {
    let mock_server = MockServer::start().await;
    let provider = GeminiProvider::with_api_host(test_credentials(), mock_server.uri()).unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/projects/test-project/locations/us-central1/batchPredictionJobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "projects/test-project/locations/us-central1/batchPredictionJobs/job-123",
            "state": "JOB_STATE_PENDING",
        })))
        .mount(&mock_server)
        .await;

    let model = find("gemini-1.5-pro").unwrap();
    let line = provider.build_request_line("req-1", model, "hello").unwrap();

    let provider_batch_id = provider.submit_batch(&[line]).await.unwrap();

    assert_eq!(
        provider_batch_id,
        "projects/test-project/locations/us-central1/batchPredictionJobs/job-123"
    );
}

#[tokio::test]
async fn poll_batch_maps_succeeded_state_to_completed() {
    let mock_server = MockServer::start().await;
    let provider = GeminiProvider::with_api_host(test_credentials(), mock_server.uri()).unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/job-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "job-123",
            "state": "JOB_STATE_SUCCEEDED",
        })))
        .mount(&mock_server)
        .await;

    let poll = provider.poll_batch("job-123").await.unwrap();

    assert_eq!(poll.status, airank_core::domain::BatchStatus::Completed);
}

#[tokio::test]
async fn fetch_results_decodes_candidate_text() {
    let mock_server = MockServer::start().await;
    let provider = GeminiProvider::with_api_host(test_credentials(), mock_server.uri()).unwrap();

    let line = serde_json::json!({
        "key": "req-1",
        "response": {
            "candidates": [{"content": {"role": "model", "parts": [{"text": "hi there"}]}}],
            "usageMetadata": {"totalTokenCount": 9},
        },
        "error": null,
    })
    .to_string();

    Mock::given(method("GET"))
        .and(path("/v1/job-123:predictions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(line))
        .mount(&mock_server)
        .await;

    let results = provider.fetch_results("job-123").await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].custom_id, "req-1");
    assert_eq!(results[0].text.as_deref(), Some("hi there"));
    assert_eq!(results[0].token_count, Some(9));
}

#[tokio::test]
async fn complete_sync_returns_authentication_failed_on_401() {
    let mock_server = MockServer::start().await;
    let provider = GeminiProvider::with_api_host(test_credentials(), mock_server.uri()).unwrap();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
        .mount(&mock_server)
        .await;

    let model = find("gemini-1.5-pro").unwrap();
    let result = provider.complete_sync(model, "hello").await;

    assert!(matches!(result, Err(airank_core::error::CoreError::AuthenticationFailed { .. })));
}

#[tokio::test]
async fn complete_sync_returns_rate_limit_exceeded_on_429() {
    let mock_server = MockServer::start().await;
    let provider = GeminiProvider::with_api_host(test_credentials(), mock_server.uri()).unwrap();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&mock_server)
        .await;

    let model = find("gemini-1.5-pro").unwrap();
    let result = provider.complete_sync(model, "hello").await;

    assert!(matches!(
        result,
        Err(airank_core::error::CoreError::RateLimitExceeded { retry_after_seconds: 60 })
    ));
}

//! Gemini batch provider.
//!
//! Uses the Gemini Batch API: upload a JSONL file of `generateContent`
//! requests, create a batch job referencing it, poll the job, then
//! download and decode the output file. Mirrors [`super::openai`]'s
//! submit/poll/fetch shape, adapted to Gemini's `contents`/`parts` request
//! body and `candidates` response body.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::GcpCredentials;
use crate::domain::BatchStatus;
use crate::error::{CoreError, CoreResult};
use crate::internals::retry::{RetryExecutor, RetryPolicy};
use crate::logging::log_debug;
use crate::model_catalog::ModelSpec;

use super::{BatchPollResult, BatchProvider, BatchRequestLine, BatchResultLine};

#[derive(Debug, Serialize)]
struct GenerateContentBody {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct BatchJobResponse {
    name: String,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "totalTokenCount")]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct BatchResultLineWire {
    key: String,
    response: Option<GenerateContentResponse>,
    error: Option<Value>,
}

/// Gemini batch provider implementation, targeting Vertex AI's
/// generative-language batch endpoint.
pub struct GeminiProvider {
    http_client: reqwest::Client,
    credentials: GcpCredentials,
    api_host: String,
    retry_executor: Mutex<RetryExecutor>,
}

impl GeminiProvider {
    pub fn new(credentials: GcpCredentials) -> CoreResult<Self> {
        let api_host = format!("https://{}-aiplatform.googleapis.com", credentials.region);
        Self::with_api_host(credentials, api_host)
    }

    /// Construct a provider pointed at a non-default API host, used by
    /// tests to target a [`wiremock::MockServer`].
    pub fn with_api_host(credentials: GcpCredentials, api_host: String) -> CoreResult<Self> {
        if credentials.project_id.is_empty() {
            return Err(CoreError::configuration("GCP project id is required"));
        }

        Ok(Self {
            http_client: reqwest::Client::new(),
            credentials,
            api_host,
            retry_executor: Mutex::new(RetryExecutor::new(RetryPolicy::default())),
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn base_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/locations/{}",
            self.api_host, self.credentials.project_id, self.credentials.region
        )
    }
}

async fn handle_response_status(response: reqwest::Response) -> CoreResult<Value> {
    let status = response.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        let body = response.text().await.unwrap_or_default();
        return Err(CoreError::authentication_failed(body));
    }
    if status.as_u16() == 429 {
        return Err(CoreError::rate_limit_exceeded(60));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CoreError::provider_request_failed(
            format!("gemini returned {status}: {body}"),
            None,
        ));
    }
    response.json::<Value>().await.map_err(CoreError::from)
}

#[async_trait]
impl BatchProvider for GeminiProvider {
    fn build_request_line(&self, custom_id: &str, model: &ModelSpec, prompt_text: &str) -> CoreResult<BatchRequestLine> {
        let body = GenerateContentBody {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: prompt_text.to_string(),
                }],
            }],
            generation_config: Some(GenerationConfig {
                temperature: model.generation.temperature,
                max_output_tokens: Some(model.generation.max_output_tokens),
            }),
        };

        Ok(BatchRequestLine {
            custom_id: custom_id.to_string(),
            body: json!({
                "key": custom_id,
                "request": body,
            }),
        })
    }

    async fn submit_batch(&self, lines: &[BatchRequestLine]) -> CoreResult<String> {
        let jsonl_body = lines
            .iter()
            .map(|line| line.body.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        log_debug!(provider = "gemini", line_count = lines.len(), "submitting batch prediction job");

        let headers = self.headers();
        let mut retry_executor = self.retry_executor.lock().await;
        let created: Value = retry_executor
            .execute(|| async {
                let response = self
                    .http_client
                    .post(format!("{}/batchPredictionJobs", self.base_url()))
                    .headers(headers.clone())
                    .json(&json!({
                        "displayName": "airank-batch",
                        "inputConfig": {
                            "instancesFormat": "jsonl",
                            "gcsSource": { "uris": [] },
                            "inlineContents": jsonl_body,
                        },
                        "outputConfig": { "predictionsFormat": "jsonl" },
                    }))
                    .send()
                    .await?;
                handle_response_status(response).await
            })
            .await?;

        let parsed: BatchJobResponse =
            serde_json::from_value(created).map_err(|e| CoreError::response_parsing(e.to_string()))?;
        Ok(parsed.name)
    }

    async fn poll_batch(&self, provider_batch_id: &str) -> CoreResult<BatchPollResult> {
        let headers = self.headers();
        let mut retry_executor = self.retry_executor.lock().await;
        let value: Value = retry_executor
            .execute(|| async {
                let response = self
                    .http_client
                    .get(format!("{}/v1/{provider_batch_id}", self.api_host))
                    .headers(headers.clone())
                    .send()
                    .await?;
                handle_response_status(response).await
            })
            .await?;

        let parsed: BatchJobResponse =
            serde_json::from_value(value).map_err(|e| CoreError::response_parsing(e.to_string()))?;

        let status = match parsed.state.as_deref() {
            Some("JOB_STATE_PENDING") | Some("JOB_STATE_RUNNING") | Some("JOB_STATE_QUEUED") => BatchStatus::InProgress,
            Some("JOB_STATE_SUCCEEDED") => BatchStatus::Completed,
            Some("JOB_STATE_FAILED") => BatchStatus::Failed,
            Some("JOB_STATE_EXPIRED") => BatchStatus::Expired,
            Some("JOB_STATE_CANCELLED") | Some("JOB_STATE_CANCELLING") => BatchStatus::Cancelled,
            other => {
                return Err(CoreError::not_supported(format!("unknown gemini job state {other:?}")));
            }
        };

        Ok(BatchPollResult { status, error: None })
    }

    async fn fetch_results(&self, provider_batch_id: &str) -> CoreResult<Vec<BatchResultLine>> {
        let headers = self.headers();
        let mut retry_executor = self.retry_executor.lock().await;
        let contents: String = retry_executor
            .execute(|| async {
                let response = self
                    .http_client
                    .get(format!("{}/v1/{provider_batch_id}:predictions", self.api_host))
                    .headers(headers.clone())
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(CoreError::provider_request_failed(
                        format!("failed to download gemini batch output: {}", response.status()),
                        None,
                    ));
                }
                response.text().await.map_err(CoreError::from)
            })
            .await?;

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let wire: BatchResultLineWire =
                    serde_json::from_str(line).map_err(|e| CoreError::response_parsing(e.to_string()))?;
                if let Some(error) = wire.error {
                    return Ok(BatchResultLine {
                        custom_id: wire.key,
                        text: None,
                        token_count: None,
                        error: Some(error.to_string()),
                    });
                }
                let response = wire
                    .response
                    .ok_or_else(|| CoreError::response_parsing("result line missing response"))?;
                let text = response
                    .candidates
                    .first()
                    .and_then(|c| c.content.parts.first())
                    .map(|p| p.text.clone())
                    .ok_or_else(|| CoreError::response_parsing("result line has no candidates"))?;
                Ok(BatchResultLine {
                    custom_id: wire.key,
                    text: Some(text),
                    token_count: response.usage_metadata.map(|u| u.total_token_count),
                    error: None,
                })
            })
            .collect()
    }

    fn extract_text(&self, raw_response: &Value) -> CoreResult<String> {
        raw_response
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .and_then(|parts| parts.first())
            .and_then(|part| part.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CoreError::response_parsing("response missing candidates[0].content.parts[0].text"))
    }

    async fn complete_sync(&self, model: &ModelSpec, prompt_text: &str) -> CoreResult<Value> {
        let body = GenerateContentBody {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: prompt_text.to_string(),
                }],
            }],
            generation_config: Some(GenerationConfig {
                temperature: model.generation.temperature,
                max_output_tokens: Some(model.generation.max_output_tokens),
            }),
        };

        let headers = self.headers();
        let mut retry_executor = self.retry_executor.lock().await;
        retry_executor
            .execute(|| async {
                let response = self
                    .http_client
                    .post(format!(
                        "{}/publishers/google/models/{}:generateContent",
                        self.base_url(),
                        model.identifier
                    ))
                    .headers(headers.clone())
                    .json(&body)
                    .send()
                    .await?;
                handle_response_status(response).await
            })
            .await
    }

    fn provider_name(&self) -> &'static str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_catalog::find;

    fn provider() -> GeminiProvider {
        GeminiProvider::new(GcpCredentials {
            project_id: "test-project".to_string(),
            region: "us-central1".to_string(),
            batch_bucket: None,
            pubsub_topic: None,
            pubsub_subscription: None,
        })
        .unwrap()
    }

    #[test]
    fn rejects_empty_project_id() {
        let result = GeminiProvider::new(GcpCredentials {
            project_id: String::new(),
            region: "us-central1".to_string(),
            batch_bucket: None,
            pubsub_topic: None,
            pubsub_subscription: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn with_api_host_overrides_the_default_endpoint() {
        let provider = GeminiProvider::with_api_host(
            GcpCredentials {
                project_id: "test-project".to_string(),
                region: "us-central1".to_string(),
                batch_bucket: None,
                pubsub_topic: None,
                pubsub_subscription: None,
            },
            "http://127.0.0.1:9999".to_string(),
        )
        .unwrap();
        assert_eq!(provider.api_host, "http://127.0.0.1:9999");
    }

    #[test]
    fn build_request_line_sets_custom_id_as_key() {
        let provider = provider();
        let model = find("gemini-1.5-pro").unwrap();
        let line = provider.build_request_line("req-1", model, "hello").unwrap();
        assert_eq!(line.body["key"], "req-1");
    }

    #[test]
    fn extract_text_reads_first_candidate_part() {
        let provider = provider();
        let raw = json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "hi there"}]}}]
        });
        assert_eq!(provider.extract_text(&raw).unwrap(), "hi there");
    }
}

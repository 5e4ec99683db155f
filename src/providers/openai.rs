//! OpenAI batch provider.
//!
//! Uses OpenAI's asynchronous Batch API: upload a JSONL file of request
//! lines, create a batch against that file, poll until it completes, then
//! download and decode the output file. Request construction and HTTP
//! handling share the same client/header/retry shape as `complete_sync`'s
//! synchronous chat-completion calls.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::OpenAiCredentials;
use crate::domain::BatchStatus;
use crate::error::{CoreError, CoreResult};
use crate::internals::retry::{RetryExecutor, RetryPolicy};
use crate::logging::{log_debug, log_error};
use crate::model_catalog::ModelSpec;

use super::{BatchPollResult, BatchProvider, BatchRequestLine, BatchResultLine};

const BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatBody {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct BatchStatusResponse {
    status: String,
    output_file_id: Option<String>,
    error_file_id: Option<String>,
    errors: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BatchResultLineWire {
    custom_id: String,
    response: Option<BatchResultBody>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BatchResultBody {
    body: ChatCompletionResponse,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

/// OpenAI batch provider implementation.
pub struct OpenAiProvider {
    http_client: reqwest::Client,
    credentials: OpenAiCredentials,
    base_url: String,
    retry_executor: Mutex<RetryExecutor>,
}

impl OpenAiProvider {
    pub fn new(credentials: OpenAiCredentials) -> CoreResult<Self> {
        Self::with_base_url(credentials, BASE_URL.to_string())
    }

    /// Construct a provider pointed at a non-default base URL, used by
    /// tests to target a [`wiremock::MockServer`].
    pub fn with_base_url(credentials: OpenAiCredentials, base_url: String) -> CoreResult<Self> {
        if credentials.api_key.is_empty() {
            return Err(CoreError::configuration("OpenAI API key is required"));
        }

        Ok(Self {
            http_client: reqwest::Client::new(),
            credentials,
            base_url,
            retry_executor: Mutex::new(RetryExecutor::new(RetryPolicy::default())),
        })
    }

    fn auth_headers(&self) -> CoreResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.credentials.api_key))
                .map_err(|e| CoreError::configuration(format!("invalid API key format: {e}")))?,
        );
        Ok(headers)
    }

    async fn upload_batch_file(&self, jsonl_body: String) -> CoreResult<String> {
        let headers = self.auth_headers()?;

        let mut retry_executor = self.retry_executor.lock().await;
        retry_executor
            .execute(|| async {
                let part = reqwest::multipart::Part::text(jsonl_body.clone())
                    .file_name("batch_input.jsonl")
                    .mime_str("application/jsonl")
                    .map_err(|e| CoreError::provider_request_failed(e.to_string(), None))?;
                let form = reqwest::multipart::Form::new()
                    .text("purpose", "batch")
                    .part("file", part);

                let response = self
                    .http_client
                    .post(format!("{}/files", self.base_url))
                    .headers(headers.clone())
                    .multipart(form)
                    .send()
                    .await?;
                handle_response_status(response).await
            })
            .await
            .and_then(|value: Value| {
                value
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| CoreError::response_parsing("file upload response missing id"))
            })
    }
}

async fn handle_response_status(response: reqwest::Response) -> CoreResult<Value> {
    let status = response.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        let body = response.text().await.unwrap_or_default();
        return Err(CoreError::authentication_failed(body));
    }
    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        return Err(CoreError::rate_limit_exceeded(retry_after));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        log_error!(status = %status, body = %body, "openai request failed");
        return Err(CoreError::provider_request_failed(
            format!("openai returned {status}: {body}"),
            None,
        ));
    }
    response.json::<Value>().await.map_err(CoreError::from)
}

#[async_trait]
impl BatchProvider for OpenAiProvider {
    fn build_request_line(&self, custom_id: &str, model: &ModelSpec, prompt_text: &str) -> CoreResult<BatchRequestLine> {
        let body = if model.generation.uses_completion_token_limit {
            ChatBody {
                model: model.identifier.to_string(),
                messages: vec![ChatMessage {
                    role: "user".to_string(),
                    content: prompt_text.to_string(),
                }],
                temperature: None,
                max_tokens: None,
                max_completion_tokens: Some(model.generation.max_output_tokens),
            }
        } else {
            ChatBody {
                model: model.identifier.to_string(),
                messages: vec![ChatMessage {
                    role: "user".to_string(),
                    content: prompt_text.to_string(),
                }],
                temperature: model.generation.temperature,
                max_tokens: Some(model.generation.max_output_tokens),
                max_completion_tokens: None,
            }
        };

        Ok(BatchRequestLine {
            custom_id: custom_id.to_string(),
            body: json!({
                "custom_id": custom_id,
                "method": "POST",
                "url": "/v1/chat/completions",
                "body": body,
            }),
        })
    }

    async fn submit_batch(&self, lines: &[BatchRequestLine]) -> CoreResult<String> {
        let jsonl_body = lines
            .iter()
            .map(|line| line.body.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        log_debug!(provider = "openai", line_count = lines.len(), "uploading batch input file");
        let input_file_id = self.upload_batch_file(jsonl_body).await?;

        let headers = self.auth_headers()?;
        let mut retry_executor = self.retry_executor.lock().await;
        let created: Value = retry_executor
            .execute(|| async {
                let response = self
                    .http_client
                    .post(format!("{}/batches", self.base_url))
                    .headers(headers.clone())
                    .json(&json!({
                        "input_file_id": input_file_id,
                        "endpoint": "/v1/chat/completions",
                        "completion_window": "24h",
                    }))
                    .send()
                    .await?;
                handle_response_status(response).await
            })
            .await?;

        created
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CoreError::response_parsing("batch creation response missing id"))
    }

    async fn poll_batch(&self, provider_batch_id: &str) -> CoreResult<BatchPollResult> {
        let headers = self.auth_headers()?;
        let mut retry_executor = self.retry_executor.lock().await;
        let value: Value = retry_executor
            .execute(|| async {
                let response = self
                    .http_client
                    .get(format!("{}/batches/{provider_batch_id}", self.base_url))
                    .headers(headers.clone())
                    .send()
                    .await?;
                handle_response_status(response).await
            })
            .await?;

        let parsed: BatchStatusResponse =
            serde_json::from_value(value).map_err(|e| CoreError::response_parsing(e.to_string()))?;

        let status = match parsed.status.as_str() {
            "validating" | "in_progress" | "finalizing" => BatchStatus::InProgress,
            "completed" => BatchStatus::Completed,
            "failed" => BatchStatus::Failed,
            "expired" => BatchStatus::Expired,
            "cancelled" | "cancelling" => BatchStatus::Cancelled,
            other => {
                return Err(CoreError::not_supported(format!("unknown openai batch status {other}")));
            }
        };

        let error = parsed
            .errors
            .map(|e| e.to_string())
            .or(parsed.error_file_id.map(|id| format!("error file: {id}")));

        Ok(BatchPollResult { status, error })
    }

    async fn fetch_results(&self, provider_batch_id: &str) -> CoreResult<Vec<BatchResultLine>> {
        let headers = self.auth_headers()?;

        let status: BatchStatusResponse = {
            let mut retry_executor = self.retry_executor.lock().await;
            let value = retry_executor
                .execute(|| async {
                    let response = self
                        .http_client
                        .get(format!("{}/batches/{provider_batch_id}", self.base_url))
                        .headers(headers.clone())
                        .send()
                        .await?;
                    handle_response_status(response).await
                })
                .await?;
            serde_json::from_value(value).map_err(|e| CoreError::response_parsing(e.to_string()))?
        };

        let output_file_id = status
            .output_file_id
            .ok_or_else(|| CoreError::invariant("completed batch has no output_file_id"))?;

        let mut retry_executor = self.retry_executor.lock().await;
        let contents: String = retry_executor
            .execute(|| async {
                let response = self
                    .http_client
                    .get(format!("{}/files/{output_file_id}/content", self.base_url))
                    .headers(headers.clone())
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(CoreError::provider_request_failed(
                        format!("failed to download batch output file: {}", response.status()),
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
                        custom_id: wire.custom_id,
                        text: None,
                        token_count: None,
                        error: Some(error.to_string()),
                    });
                }
                let body = wire
                    .response
                    .ok_or_else(|| CoreError::response_parsing("result line missing response body"))?
                    .body;
                let text = body
                    .choices
                    .first()
                    .map(|c| c.message.content.clone())
                    .ok_or_else(|| CoreError::response_parsing("result line has no choices"))?;
                Ok(BatchResultLine {
                    custom_id: wire.custom_id,
                    text: Some(text),
                    token_count: body.usage.map(|u| u.total_tokens),
                    error: None,
                })
            })
            .collect()
    }

    fn extract_text(&self, raw_response: &Value) -> CoreResult<String> {
        raw_response
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CoreError::response_parsing("response missing choices[0].message.content"))
    }

    async fn complete_sync(&self, model: &ModelSpec, prompt_text: &str) -> CoreResult<Value> {
        let headers = self.auth_headers()?;
        let body = if model.generation.uses_completion_token_limit {
            ChatBody {
                model: model.identifier.to_string(),
                messages: vec![ChatMessage {
                    role: "user".to_string(),
                    content: prompt_text.to_string(),
                }],
                temperature: None,
                max_tokens: None,
                max_completion_tokens: Some(model.generation.max_output_tokens),
            }
        } else {
            ChatBody {
                model: model.identifier.to_string(),
                messages: vec![ChatMessage {
                    role: "user".to_string(),
                    content: prompt_text.to_string(),
                }],
                temperature: model.generation.temperature,
                max_tokens: Some(model.generation.max_output_tokens),
                max_completion_tokens: None,
            }
        };

        let mut retry_executor = self.retry_executor.lock().await;
        retry_executor
            .execute(|| async {
                let response = self
                    .http_client
                    .post(format!("{}/chat/completions", self.base_url))
                    .headers(headers.clone())
                    .json(&body)
                    .send()
                    .await?;
                handle_response_status(response).await
            })
            .await
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_catalog::find;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(OpenAiCredentials {
            api_key: "test-key".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn rejects_empty_api_key() {
        let result = OpenAiProvider::new(OpenAiCredentials { api_key: String::new() });
        assert!(result.is_err());
    }

    #[test]
    fn with_base_url_overrides_the_default_endpoint() {
        let provider = OpenAiProvider::with_base_url(
            OpenAiCredentials { api_key: "test-key".to_string() },
            "http://127.0.0.1:9999".to_string(),
        )
        .unwrap();
        assert_eq!(provider.base_url, "http://127.0.0.1:9999");
    }

    #[test]
    fn o1_class_model_uses_completion_token_limit() {
        let provider = provider();
        let model = find("o1-mini").unwrap();
        let line = provider.build_request_line("req-1", model, "hello").unwrap();
        let body = &line.body["body"];
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("max_completion_tokens").is_some());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn standard_model_uses_max_tokens_and_temperature() {
        let provider = provider();
        let model = find("gpt-4o").unwrap();
        let line = provider.build_request_line("req-2", model, "hello").unwrap();
        let body = &line.body["body"];
        assert!(body.get("max_tokens").is_some());
        assert!(body.get("temperature").is_some());
    }

    #[test]
    fn extract_text_reads_first_choice_content() {
        let provider = provider();
        let raw = json!({
            "choices": [{"message": {"role": "assistant", "content": "hello world"}}]
        });
        assert_eq!(provider.extract_text(&raw).unwrap(), "hello world");
    }

    #[test]
    fn extract_text_errors_on_missing_choices() {
        let provider = provider();
        let raw = json!({});
        assert!(provider.extract_text(&raw).is_err());
    }
}

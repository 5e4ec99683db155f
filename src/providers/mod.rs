//! Provider abstraction for batch LLM submission.
//!
//! A single-call completion trait isn't enough for how these providers are
//! actually driven here: build one request line per prompt/model pair,
//! submit the assembled batch, poll it, then fetch and decode results.

pub mod gemini;
pub mod openai;
pub mod sentiment_provider;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::BatchStatus;
use crate::error::CoreResult;
use crate::model_catalog::ModelSpec;

/// One line of a provider's batch request payload, already serialized to
/// that provider's wire shape.
#[derive(Debug, Clone)]
pub struct BatchRequestLine {
    pub custom_id: String,
    pub body: Value,
}

/// A provider's view of a previously submitted batch.
#[derive(Debug, Clone)]
pub struct BatchPollResult {
    pub status: BatchStatus,
    pub error: Option<String>,
}

/// One decoded result line from a completed batch's output file.
#[derive(Debug, Clone)]
pub struct BatchResultLine {
    pub custom_id: String,
    pub text: Option<String>,
    pub token_count: Option<u32>,
    pub error: Option<String>,
}

/// A provider capable of running prompts through its asynchronous batch API.
///
/// Implementations own their own HTTP client configuration and credential
/// handling; callers drive the submit/poll/fetch lifecycle and never touch
/// the provider's wire format directly.
#[async_trait]
pub trait BatchProvider: Send + Sync {
    /// Build one request line for a single prompt/model pairing.
    fn build_request_line(&self, custom_id: &str, model: &ModelSpec, prompt_text: &str) -> CoreResult<BatchRequestLine>;

    /// Upload and submit a batch, returning the provider's batch identifier.
    async fn submit_batch(&self, lines: &[BatchRequestLine]) -> CoreResult<String>;

    /// Poll a previously submitted batch for its current status.
    async fn poll_batch(&self, provider_batch_id: &str) -> CoreResult<BatchPollResult>;

    /// Fetch and decode the results of a completed batch.
    async fn fetch_results(&self, provider_batch_id: &str) -> CoreResult<Vec<BatchResultLine>>;

    /// Extract the primary text content from a raw provider response value,
    /// used by providers that are also invoked synchronously (sentiment
    /// analysis calls, which do not go through the batch lifecycle).
    fn extract_text(&self, raw_response: &Value) -> CoreResult<String>;

    /// Issue a single synchronous completion call outside the batch
    /// lifecycle, used for sentiment analysis follow-up calls.
    async fn complete_sync(&self, model: &ModelSpec, prompt_text: &str) -> CoreResult<Value>;

    fn provider_name(&self) -> &'static str;
}

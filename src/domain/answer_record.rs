use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::SentimentAnalysis;

/// A single model's raw reply to a prompt, persisted once the batch result
/// processor fans a completed batch's results out by `custom_id`.
///
/// One row per (prompt, model, submission) — `response_time_ms` is `0` for
/// batch submissions, since the provider's batch API reports no per-request
/// latency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub workspace_id: ObjectId,
    /// The batch request line this answer fans out from. Upserted on, so a
    /// processor re-run after a crash can't insert the same line twice.
    pub custom_id: String,
    pub prompt_id: ObjectId,
    pub prompt_text: String,
    pub model_id: String,
    pub model_display_name: String,
    pub provider: String,
    pub batch_id: ObjectId,
    pub raw_text: String,
    pub token_count: u32,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_analysis: Option<SentimentAnalysis>,
    pub created_at: DateTime<Utc>,
}

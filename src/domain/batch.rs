use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a submitted provider batch job.
///
/// A tagged enum in place of the free-form status strings a naive port
/// would carry over — invalid states (typos, stale provider vocabulary)
/// become unrepresentable instead of being caught at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Uploading,
    Submitted,
    InProgress,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl BatchStatus {
    /// Whether this status means the scheduler should keep polling.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired | Self::Cancelled)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Submitted => "submitted",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "uploading" => Self::Uploading,
            "submitted" => Self::Submitted,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "expired" => Self::Expired,
            "cancelled" => Self::Cancelled,
            other => {
                return Err(crate::error::CoreError::not_supported(format!(
                    "unknown batch status {other}"
                )))
            }
        })
    }
}

/// One line of the request payload uploaded to a provider's batch endpoint.
///
/// Carries a snapshot of the prompt text and model display name as they
/// stood at submission time, so the result processor doesn't need to
/// re-resolve a prompt that may have since changed or been deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequestRecord {
    pub custom_id: String,
    pub prompt_id: ObjectId,
    pub prompt_text: String,
    pub model_id: String,
    pub model_display_name: String,
}

/// One parsed response line, fanned out from the provider's results file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResultRecord {
    pub custom_id: String,
    pub raw_text: Option<String>,
    pub token_count: Option<u32>,
    pub error: Option<String>,
    #[serde(default)]
    pub is_processed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub total_requests: u32,
    pub completed_requests: u32,
    pub failed_requests: u32,
    /// Answer records actually persisted this run (distinct from
    /// `completed_requests`, which also counts requests already saved by a
    /// prior, interrupted run).
    pub saved_results: u32,
    /// Results where sentiment analysis fell back to `not_determined`
    /// because the model's reply had no parseable JSON object.
    pub sentiment_failed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetadata {
    pub requests: Vec<BatchRequestRecord>,
    #[serde(default)]
    pub results: Vec<BatchResultRecord>,
    #[serde(default)]
    pub processing_stats: ProcessingStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub workspace_id: ObjectId,
    pub provider: String,
    pub provider_batch_id: Option<String>,
    pub status: BatchStatus,
    pub metadata: BatchMetadata,
    /// Set exactly once the `received → processed` transition completes;
    /// guards that transition against running twice for the same batch.
    #[serde(default)]
    pub is_processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_stop_polling() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
        assert!(!BatchStatus::InProgress.is_terminal());
        assert!(!BatchStatus::Pending.is_terminal());
    }

    #[test]
    fn status_round_trips_through_display_and_from_str() {
        for status in [
            BatchStatus::Pending,
            BatchStatus::Uploading,
            BatchStatus::Submitted,
            BatchStatus::InProgress,
            BatchStatus::Completed,
            BatchStatus::Failed,
            BatchStatus::Expired,
            BatchStatus::Cancelled,
        ] {
            let parsed: BatchStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn unknown_status_string_is_rejected() {
        assert!("not-a-status".parse::<BatchStatus>().is_err());
    }
}

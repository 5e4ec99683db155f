use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entitlements::{BillingCadence, PlanId};

/// Aggregates entitlements and usage across one or more workspaces (the
/// agency model: one profile, several workspaces sharing its limits).
///
/// `allowed_models` and the `*_limit`/`*_used` pairs are derived fields,
/// written by [`crate::entitlements::EntitlementsService::apply_plan`] —
/// nothing outside that function should set them directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingProfile {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub workspace_id: ObjectId,
    pub current_plan: PlanId,
    pub brands_limit: u32,
    pub prompts_limit: u32,
    pub models_limit: u32,
    pub allowed_models: Vec<String>,
    pub prompt_character_limit: u32,
    pub job_cadence: BillingCadence,
    pub data_retention_days: Option<u32>,
    pub brands_used: u32,
    pub prompts_used: u32,
    pub models_used: u32,
    pub prompts_reset_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_job_run_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

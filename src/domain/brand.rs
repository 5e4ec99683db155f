use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Whether a brand mentioned in a sentiment prompt is the workspace's own
/// brand or a named competitor — drives [`crate::sentiment_prompt`]'s prompt
/// construction and the per-brand attribution on the resulting
/// [`crate::domain::BrandSentiment`] entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrandKind {
    Own,
    Competitor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brand {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub workspace_id: ObjectId,
    pub name: String,
    pub kind: BrandKind,
}

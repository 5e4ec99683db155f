use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant. Each workspace's domain documents (prompts, brands, batches,
/// answers) live in their own per-workspace database, resolved through
/// [`crate::db::Database::for_workspace`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

use bson::oid::ObjectId;
use bson::Bson;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The MongoDB change-stream operation types a [`ListenerRule`] can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Replace,
    Delete,
}

/// A workspace-scoped subscription the Change Router bootstraps a change
/// stream for. Rules are reconciled against live streams by the router's
/// sweeper at least every `sweep_interval_secs` (see
/// [`crate::config::SchedulerSettings`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerRule {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub workspace_id: ObjectId,
    pub collection: String,
    /// Equality predicates matched against a changed document's
    /// `fullDocument` — e.g. `{"status": "received", "isProcessed": false}`.
    /// A change event must match every entry to trigger this rule; an empty
    /// filter matches every document.
    #[serde(default)]
    pub filter: Vec<(String, Bson)>,
    pub operations: Vec<ChangeOperation>,
    pub job_name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl ListenerRule {
    /// Whether `full_document` satisfies every equality predicate in
    /// `filter`. An unset field, or one deleted out from under the rule,
    /// fails the match.
    pub fn matches(&self, full_document: &bson::Document) -> bool {
        self.filter
            .iter()
            .all(|(field, expected)| full_document.get(field) == Some(expected))
    }
}

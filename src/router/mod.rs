//! Change Router: bootstraps a MongoDB change stream per active
//! [`ListenerRule`] and dispatches matching events to the named job.
//!
//! Owns a `HashMap<StreamKey, ActiveStream>` the same way
//! [`crate::scheduler::Scheduler`] owns its job registry — one long-lived
//! task per active subscription, reconciled periodically by
//! [`sweeper::sweep`] rather than rebuilt from scratch on every tick.

pub mod sweeper;

use std::collections::HashMap;
use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{Bson, Document};
use futures_util::{StreamExt, TryStreamExt};
use mongodb::change_stream::options::{ChangeStreamOptions, FullDocumentType};
use mongodb::Database as MongoDatabase;
use tokio::sync::{watch, Mutex};

use crate::db::{collections, Database};
use crate::domain::{ChangeOperation, ListenerRule};
use crate::error::{CoreError, CoreResult};
use crate::logging::{log_error, log_info, log_warn};

/// A change event that matched a rule's operation set and document filter,
/// carrying everything a job needs to act on the change without re-reading
/// the document itself.
#[derive(Debug, Clone)]
pub struct MatchedChange {
    pub workspace_id: ObjectId,
    pub job_name: String,
    pub collection: String,
    pub document_id: Option<Bson>,
    pub document: Document,
    pub operation: ChangeOperation,
}

/// Identifies one active change-stream subscription.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct StreamKey {
    pub workspace_id: ObjectId,
    pub rule_id: ObjectId,
}

struct ActiveStream {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

/// Callback invoked when a watched document change matches a rule's
/// configured operations and filter. Dispatching the named job is
/// intentionally left to the caller (typically by enqueuing scheduler work)
/// rather than invoked directly here, keeping the router decoupled from job
/// execution.
pub type ChangeCallback = Arc<dyn Fn(MatchedChange) + Send + Sync>;

pub struct ChangeRouter {
    db: Database,
    streams: Mutex<HashMap<StreamKey, ActiveStream>>,
    on_change: ChangeCallback,
}

impl ChangeRouter {
    pub fn new(db: Database, on_change: ChangeCallback) -> Self {
        Self {
            db,
            streams: Mutex::new(HashMap::new()),
            on_change,
        }
    }

    /// Ensure every active [`ListenerRule`] in `workspace_id` has a running
    /// change stream, and stop streams for rules that are no longer active.
    /// Called on startup and by the periodic sweeper.
    pub async fn reconcile(&self, workspace_id: ObjectId) -> CoreResult<()> {
        let workspace_db = self.db.for_workspace(&workspace_id);
        let rules: Vec<ListenerRule> = collections::listener_rules(&workspace_db)
            .find(bson::doc! { "active": true })
            .await?
            .try_collect()
            .await
            .map_err(CoreError::from)?;

        let mut streams = self.streams.lock().await;

        let live_keys: std::collections::HashSet<StreamKey> = rules
            .iter()
            .filter_map(|r| r.id.map(|rule_id| StreamKey { workspace_id, rule_id }))
            .collect();

        let stale: Vec<StreamKey> = streams
            .keys()
            .filter(|key| key.workspace_id == workspace_id && !live_keys.contains(key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(stream) = streams.remove(&key) {
                let _ = stream.shutdown.send(true);
                log_info!(rule_id = %key.rule_id, "stopped change stream for deactivated rule");
            }
        }

        for rule in rules {
            let Some(rule_id) = rule.id else { continue };
            let key = StreamKey { workspace_id, rule_id };
            if streams.contains_key(&key) {
                continue;
            }

            let task = self.spawn_stream(workspace_db.clone(), key.clone(), rule);
            streams.insert(key, task);
        }

        Ok(())
    }

    fn spawn_stream(&self, workspace_db: MongoDatabase, key: StreamKey, rule: ListenerRule) -> ActiveStream {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let on_change = self.on_change.clone();
        let collection_name = rule.collection.clone();
        let watched_ops = rule.operations.clone();
        let stream_key = key.clone();

        let task = tokio::spawn(async move {
            let collection = workspace_db.collection::<Document>(&collection_name);
            let options = ChangeStreamOptions::builder()
                .full_document(Some(FullDocumentType::UpdateLookup))
                .build();
            let mut change_stream = match collection.watch(vec![], options).await {
                Ok(stream) => stream,
                Err(e) => {
                    log_error!(collection = %collection_name, error = %e, "failed to open change stream");
                    return;
                }
            };

            loop {
                tokio::select! {
                    next = change_stream.next() => {
                        match next {
                            Some(Ok(event)) => {
                                if let Some(operation) = classify_operation(&event.operation_type) {
                                    if watched_ops.contains(&operation) {
                                        if let Some(document) = event.full_document {
                                            if rule.matches(&document) {
                                                on_change(MatchedChange {
                                                    workspace_id: stream_key.workspace_id,
                                                    job_name: rule.job_name.clone(),
                                                    collection: collection_name.clone(),
                                                    document_id: document.get("_id").cloned(),
                                                    document,
                                                    operation,
                                                });
                                            }
                                        }
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                log_warn!(collection = %collection_name, error = %e, "change stream error, reconnecting on next sweep");
                                break;
                            }
                            None => break,
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        ActiveStream {
            shutdown: shutdown_tx,
            task,
        }
    }

    pub async fn shutdown(&self) {
        let mut streams = self.streams.lock().await;
        for (_, stream) in streams.drain() {
            let _ = stream.shutdown.send(true);
            stream.task.abort();
        }
    }
}

fn classify_operation(op: &mongodb::change_stream::event::OperationType) -> Option<ChangeOperation> {
    use mongodb::change_stream::event::OperationType as Op;
    match op {
        Op::Insert => Some(ChangeOperation::Insert),
        Op::Update => Some(ChangeOperation::Update),
        Op::Replace => Some(ChangeOperation::Replace),
        Op::Delete => Some(ChangeOperation::Delete),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_keys_are_distinct_per_rule() {
        let workspace_id = ObjectId::new();
        let a = StreamKey { workspace_id, rule_id: ObjectId::new() };
        let b = StreamKey { workspace_id, rule_id: ObjectId::new() };
        assert_ne!(a, b);
    }

    fn rule_with_filter(filter: Vec<(String, Bson)>) -> ListenerRule {
        ListenerRule {
            id: None,
            workspace_id: ObjectId::new(),
            collection: "batches".to_string(),
            filter,
            operations: vec![ChangeOperation::Update],
            job_name: "batch_result_processor".to_string(),
            active: true,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn empty_filter_matches_every_document() {
        let rule = rule_with_filter(vec![]);
        let doc = bson::doc! { "status": "received" };
        assert!(rule.matches(&doc));
    }

    #[test]
    fn filter_requires_every_predicate_to_match() {
        let rule = rule_with_filter(vec![
            ("status".to_string(), Bson::String("received".to_string())),
            ("isProcessed".to_string(), Bson::Boolean(false)),
        ]);
        let matching = bson::doc! { "status": "received", "isProcessed": false };
        let wrong_status = bson::doc! { "status": "processed", "isProcessed": false };
        let missing_field = bson::doc! { "status": "received" };
        assert!(rule.matches(&matching));
        assert!(!rule.matches(&wrong_status));
        assert!(!rule.matches(&missing_field));
    }
}

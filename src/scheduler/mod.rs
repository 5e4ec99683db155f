//! Static job registry and execution loop.
//!
//! A struct owning a policy plus mutable runtime state (see
//! [`crate::internals::retry::RetryExecutor`]) generalized into a registry
//! of named jobs, each backed by an `Arc<dyn JobHandler>` dispatched the
//! same way providers are dispatched through `Arc<dyn BatchProvider>`. Jobs
//! are registered once at process startup — never discovered by scanning
//! the filesystem.

pub mod lock;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::Document;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::config::SchedulerSettings;
use crate::db::{collections, Database};
use crate::domain::{JobHistory, JobOutcome, ScheduledJob};
use crate::error::{CoreError, CoreResult};
use crate::logging::{log_error, log_info, log_warn};

use self::lock::JobLock;

/// Lock lifetime for a dynamically-enqueued job claimed off the durable
/// queue. Long enough to cover a multi-result batch fan-out between
/// `touch()` calls; a job that never calls `touch()` or `progress()` and
/// outlives this is presumed dead and re-claimable.
const QUEUE_LOCK_TTL_MS: i64 = 600_000;

/// Jobs claimed per queue-poll tick, bounded so one instance can't starve
/// its fixed-cadence jobs of CPU/connection time under a queue backlog.
const MAX_CLAIMS_PER_TICK: usize = 5;

/// How often a registered job should be attempted.
#[derive(Debug, Clone, Copy)]
pub enum JobCadence {
    EverySeconds(u64),
}

impl JobCadence {
    fn as_duration(self) -> Duration {
        match self {
            Self::EverySeconds(secs) => Duration::from_secs(secs),
        }
    }
}

/// Options accepted by [`Scheduler::enqueue`].
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    run_at: Option<DateTime<Utc>>,
    repeat_every: Option<(Duration, bool)>,
    unique: Option<String>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run no earlier than `at`, rather than as soon as claimed.
    pub fn run_at(mut self, at: DateTime<Utc>) -> Self {
        self.run_at = Some(at);
        self
    }

    /// Re-enqueue the job `interval` after each completed run. If
    /// `skip_immediate` is set, the first run is delayed by `interval`
    /// instead of running as soon as claimed.
    pub fn repeat_every(mut self, interval: Duration, skip_immediate: bool) -> Self {
        self.repeat_every = Some((interval, skip_immediate));
        self
    }

    /// Only one queue entry with this `(name, key)` pair may exist at a
    /// time; re-enqueuing under the same key while one is already pending
    /// is a no-op rather than creating a second queue entry.
    pub fn unique(mut self, key: impl Into<String>) -> Self {
        self.unique = Some(key.into());
        self
    }
}

/// A unit of scheduler-visible work, claimed under a distributed lock.
///
/// `workspace_id` is `None` for process-wide jobs (e.g. the change-router
/// sweeper) and `Some` for jobs that run once per workspace.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: &JobContext) -> CoreResult<()>;
}

/// Handle passed to a running job, used to renew its distributed lock
/// during long-running work (batch result fan-out in particular).
pub struct JobContext {
    pub workspace_id: Option<ObjectId>,
    pub db: Database,
    redis: Mutex<ConnectionManager>,
    job_name: String,
    holder_id: String,
    ttl_ms: i64,
    /// Set when this run was claimed off the durable queue (an `enqueue`d
    /// job) rather than a fixed-cadence `define_job` tick — `progress()` has
    /// nowhere to persist to otherwise.
    queued_job_id: Option<ObjectId>,
}

impl JobContext {
    /// Renew this job's lock TTL. Handlers should call this every time they
    /// make forward progress on a long fan-out so the lock doesn't expire
    /// out from under them.
    pub async fn touch(&self) -> CoreResult<()> {
        let mut conn = self.redis.lock().await;
        lock::extend(&mut conn, &self.job_name, &self.holder_id, self.ttl_ms).await?;
        Ok(())
    }

    /// Report completion percentage for telemetry. A no-op for fixed-cadence
    /// jobs, which have no queue document to record it on.
    pub async fn progress(&self, pct: u8) -> CoreResult<()> {
        log_info!(job = %self.job_name, pct, "job progress");
        let Some(queued_job_id) = self.queued_job_id else {
            return Ok(());
        };
        collections::scheduled_jobs(&self.db.shared())
            .update_one(
                bson::doc! { "_id": queued_job_id },
                bson::doc! { "$set": { "progress": pct as i32 } },
            )
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }
}

struct JobDefinition {
    cadence: JobCadence,
    handler: Arc<dyn JobHandler>,
}

/// Owns the registry of named jobs and drives their execution loops.
pub struct Scheduler {
    jobs: HashMap<String, JobDefinition>,
    db: Database,
    redis: ConnectionManager,
    settings: SchedulerSettings,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(db: Database, redis: ConnectionManager, settings: SchedulerSettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            jobs: HashMap::new(),
            db,
            redis,
            settings,
            shutdown,
        }
    }

    /// Register a job handler under a unique name. Panics on duplicate
    /// names — that indicates a programming error in the static
    /// registration list, not a runtime condition to recover from.
    pub fn define_job(&mut self, name: &str, cadence: JobCadence, handler: Arc<dyn JobHandler>) {
        let previous = self.jobs.insert(name.to_string(), JobDefinition { cadence, handler });
        assert!(previous.is_none(), "job {name} registered twice");
    }

    /// Enqueue a durable, one-off-or-repeating job run, independent of any
    /// fixed-cadence job registered via [`Self::define_job`] (though the
    /// name may be the same handler — the queue poll loop dispatches by
    /// name against the same registry). `data` typically carries
    /// `{ workspaceId, documentId, collection, operationType, document,
    /// metadata }` when enqueued from the change router.
    pub async fn enqueue(&self, name: &str, data: Document, opts: EnqueueOptions) -> CoreResult<()> {
        let now = Utc::now();
        let skip_immediate = opts.repeat_every.map(|(_, skip)| skip).unwrap_or(false);
        let next_run_at = match (opts.repeat_every, opts.run_at) {
            (Some((interval, true)), _) => now + chrono_duration(interval),
            (_, Some(run_at)) => run_at,
            _ => now,
        };
        let repeat_interval_secs = opts.repeat_every.map(|(interval, _)| interval.as_secs() as i64);
        let shared = self.db.shared();
        let collection = collections::scheduled_jobs(&shared);

        if let Some(unique_key) = &opts.unique {
            collection
                .update_one(
                    bson::doc! { "name": name, "uniqueKey": unique_key },
                    bson::doc! { "$setOnInsert": {
                        "name": name,
                        "uniqueKey": unique_key,
                        "data": data,
                        "nextRunAt": next_run_at,
                        "repeatIntervalSecs": repeat_interval_secs,
                        "skipImmediate": skip_immediate,
                        "createdAt": now,
                        "updatedAt": now,
                    } },
                )
                .upsert(true)
                .await
                .map_err(CoreError::from)?;
        } else {
            let job = ScheduledJob {
                id: None,
                name: name.to_string(),
                unique_key: None,
                data,
                next_run_at,
                repeat_interval_secs,
                skip_immediate,
                locked_at: None,
                locked_by: None,
                last_run_at: None,
                last_finished_at: None,
                progress: None,
                created_at: now,
                updated_at: now,
            };
            collection.insert_one(job).await.map_err(CoreError::from)?;
        }
        Ok(())
    }

    /// Spawn one polling loop per registered job, plus one poll loop for the
    /// durable queue [`Self::enqueue`] writes to. Returns immediately; loops
    /// run until [`Scheduler::stop`] is called.
    pub fn start(&self, workspace_ids: Vec<ObjectId>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        for (name, definition) in &self.jobs {
            let name = name.clone();
            let cadence = definition.cadence;
            let handler = definition.handler.clone();
            let db = self.db.clone();
            let redis = self.redis.clone();
            let mut shutdown_rx = self.shutdown.subscribe();
            let targets = if workspace_ids.is_empty() {
                vec![None]
            } else {
                workspace_ids.iter().copied().map(Some).collect()
            };

            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(cadence.as_duration());
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            for workspace_id in &targets {
                                run_once(&name, handler.clone(), db.clone(), redis.clone(), *workspace_id).await;
                            }
                        }
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                log_info!(job = %name, "scheduler loop shutting down");
                                break;
                            }
                        }
                    }
                }
            }));
        }

        let handlers: HashMap<String, Arc<dyn JobHandler>> = self
            .jobs
            .iter()
            .map(|(name, definition)| (name.clone(), definition.handler.clone()))
            .collect();
        let db = self.db.clone();
        let redis = self.redis.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        let poll_interval = Duration::from_millis(self.settings.poll_interval_ms);

        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        poll_queue(&handlers, &db, &redis).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            log_info!("scheduler queue poll loop shutting down");
                            break;
                        }
                    }
                }
            }
        }));

        handles
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

/// Claim and run up to [`MAX_CLAIMS_PER_TICK`] due jobs off the durable
/// queue. Claiming is a single atomic `findOneAndUpdate` compare-and-set per
/// attempt, so two instances racing the same document can't both claim it.
async fn poll_queue(handlers: &HashMap<String, Arc<dyn JobHandler>>, db: &Database, redis: &ConnectionManager) {
    let shared = db.shared();
    for _ in 0..MAX_CLAIMS_PER_TICK {
        let now = Utc::now();
        let lock_floor = now - chrono::Duration::milliseconds(QUEUE_LOCK_TTL_MS);
        let holder_id = Uuid::new_v4().to_string();

        let claimed = collections::scheduled_jobs(&shared)
            .find_one_and_update(
                bson::doc! {
                    "nextRunAt": { "$lte": now },
                    "$or": [
                        { "lockedAt": { "$exists": false } },
                        { "lockedAt": bson::Bson::Null },
                        { "lockedAt": { "$lte": lock_floor } },
                    ],
                },
                bson::doc! { "$set": { "lockedAt": now, "lockedBy": &holder_id } },
            )
            .await;

        let job = match claimed {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                log_error!(error = %e, "failed to poll scheduled job queue");
                return;
            }
        };

        let Some(handler) = handlers.get(&job.name).cloned() else {
            log_warn!(job = %job.name, "queued job references an unregistered handler, dropping");
            if let Some(id) = job.id {
                let _ = collections::scheduled_jobs(&shared).delete_one(bson::doc! { "_id": id }).await;
            }
            continue;
        };

        run_claimed(job, handler, db.clone(), redis.clone()).await;
    }
}

async fn run_claimed(job: ScheduledJob, handler: Arc<dyn JobHandler>, db: Database, redis: ConnectionManager) {
    let Some(job_id) = job.id else {
        return;
    };
    let job_name = job.name.clone();
    let workspace_id = job
        .data
        .get_object_id("workspaceId")
        .ok()
        .or_else(|| job.data.get_object_id("workspace_id").ok())
        .copied();
    let holder_id = Uuid::new_v4().to_string();

    let started_at = Utc::now();
    let ctx = JobContext {
        workspace_id,
        db: db.clone(),
        redis: Mutex::new(redis.clone()),
        job_name: format!("{job_name}:{job_id}"),
        holder_id: holder_id.clone(),
        ttl_ms: QUEUE_LOCK_TTL_MS,
        queued_job_id: Some(job_id),
    };

    let result = handler.run(&ctx).await;
    let finished_at = Utc::now();

    let (outcome, message) = match &result {
        Ok(()) => (JobOutcome::Success, None),
        Err(e) => (JobOutcome::Failure, Some(e.to_string())),
    };

    if let Err(e) = record_history(&db, &job_name, workspace_id, outcome, message, started_at, finished_at).await {
        log_warn!(job = %job_name, error = %e, "failed to record job history");
    }

    let shared = db.shared();
    let update_result = if let Some(repeat_secs) = job.repeat_interval_secs {
        collections::scheduled_jobs(&shared)
            .update_one(
                bson::doc! { "_id": job_id },
                bson::doc! { "$set": {
                    "lockedAt": bson::Bson::Null,
                    "lockedBy": bson::Bson::Null,
                    "lastRunAt": started_at,
                    "lastFinishedAt": finished_at,
                    "nextRunAt": finished_at + chrono::Duration::seconds(repeat_secs),
                    "updatedAt": finished_at,
                } },
            )
            .await
            .map(|_| ())
    } else {
        collections::scheduled_jobs(&shared)
            .delete_one(bson::doc! { "_id": job_id })
            .await
            .map(|_| ())
    };

    if let Err(e) = update_result {
        log_warn!(job = %job_name, error = %e, "failed to finalize queued job record");
    }

    if let Err(e) = result {
        log_error!(job = %job_name, error = %e, "queued job run failed");
    }
}

async fn run_once(
    job_name: &str,
    handler: Arc<dyn JobHandler>,
    db: Database,
    mut redis: ConnectionManager,
    workspace_id: Option<ObjectId>,
) {
    let lock_name = match workspace_id {
        Some(id) => format!("{job_name}:{id}"),
        None => job_name.to_string(),
    };
    let holder_id = Uuid::new_v4().to_string();
    let ttl_ms = 120_000;

    let lock = match JobLock::try_claim(&mut redis, &lock_name, &holder_id, ttl_ms).await {
        Ok(Some(lock)) => lock,
        Ok(None) => return,
        Err(e) => {
            log_error!(job = %job_name, error = %e, "failed to acquire job lock");
            return;
        }
    };

    let started_at = Utc::now();
    let ctx = JobContext {
        workspace_id,
        db: db.clone(),
        redis: Mutex::new(redis.clone()),
        job_name: lock_name.clone(),
        holder_id: holder_id.clone(),
        ttl_ms,
        queued_job_id: None,
    };

    let result = handler.run(&ctx).await;
    let finished_at = Utc::now();

    let (outcome, message) = match &result {
        Ok(()) => (JobOutcome::Success, None),
        Err(e) => (JobOutcome::Failure, Some(e.to_string())),
    };

    if let Err(e) = record_history(&db, job_name, workspace_id, outcome, message, started_at, finished_at).await {
        log_warn!(job = %job_name, error = %e, "failed to record job history");
    }

    if let Err(e) = lock.release(&mut redis).await {
        log_warn!(job = %job_name, error = %e, "failed to release job lock");
    }

    if let Err(e) = result {
        log_error!(job = %job_name, error = %e, "job run failed");
    }
}

async fn record_history(
    db: &Database,
    job_name: &str,
    workspace_id: Option<ObjectId>,
    outcome: JobOutcome,
    message: Option<String>,
    started_at: chrono::DateTime<Utc>,
    finished_at: chrono::DateTime<Utc>,
) -> CoreResult<()> {
    let shared = db.shared();
    let entry = JobHistory {
        id: None,
        job_name: job_name.to_string(),
        workspace_id,
        outcome,
        message,
        started_at,
        finished_at,
    };
    collections::job_history(&shared).insert_one(entry).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_cadence_converts_to_the_expected_duration() {
        assert_eq!(JobCadence::EverySeconds(30).as_duration(), Duration::from_secs(30));
    }

    #[test]
    fn lock_names_are_scoped_per_workspace() {
        let workspace_id = ObjectId::new();
        let scoped = format!("batch_submitter:{workspace_id}");
        assert_ne!(scoped, "batch_submitter");
    }
}

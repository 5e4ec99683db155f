//! Persisted document shapes.
//!
//! Each type mirrors one MongoDB collection. Fields use `serde`'s
//! `rename_all = "camelCase"` to match the documents as they already exist
//! on disk, the same convention provider wire payloads use.

mod answer_record;
mod batch;
mod billing_profile;
mod brand;
mod job_history;
mod listener_rule;
mod prompt;
mod scheduled_job;
mod sentiment_analysis;
mod workspace;

pub use answer_record::AnswerRecord;
pub use batch::{Batch, BatchMetadata, BatchRequestRecord, BatchResultRecord, BatchStatus, ProcessingStats};
pub use billing_profile::BillingProfile;
pub use brand::{Brand, BrandKind};
pub use job_history::{JobHistory, JobOutcome};
pub use listener_rule::{ChangeOperation, ListenerRule};
pub use prompt::Prompt;
pub use scheduled_job::ScheduledJob;
pub use sentiment_analysis::{BrandSentiment, SentimentAnalysis, SentimentVerdict};
pub use workspace::Workspace;

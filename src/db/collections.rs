//! Typed collection accessors, one function per collection name, so call
//! sites never hand-type a collection string.

use mongodb::{Collection, Database as MongoDatabase};

use crate::domain::{
    AnswerRecord, Batch, BillingProfile, Brand, JobHistory, ListenerRule, Prompt, ScheduledJob, Workspace,
};

pub fn workspaces(db: &MongoDatabase) -> Collection<Workspace> {
    db.collection("workspaces")
}

pub fn prompts(db: &MongoDatabase) -> Collection<Prompt> {
    db.collection("prompts")
}

pub fn brands(db: &MongoDatabase) -> Collection<Brand> {
    db.collection("brands")
}

pub fn batches(db: &MongoDatabase) -> Collection<Batch> {
    db.collection("batches")
}

pub fn answer_records(db: &MongoDatabase) -> Collection<AnswerRecord> {
    db.collection("answerRecords")
}

pub fn listener_rules(db: &MongoDatabase) -> Collection<ListenerRule> {
    db.collection("listenerRules")
}

pub fn billing_profiles(db: &MongoDatabase) -> Collection<BillingProfile> {
    db.collection("billingProfiles")
}

pub fn job_history(db: &MongoDatabase) -> Collection<JobHistory> {
    db.collection("jobHistory")
}

pub fn scheduled_jobs(db: &MongoDatabase) -> Collection<ScheduledJob> {
    db.collection("scheduledJobs")
}

//! Submits one batch per provider, covering every active prompt against
//! every active model that provider serves.
//!
//! Idempotent: if a non-terminal batch already exists for a provider in
//! this workspace, submission is skipped for this tick rather than piling
//! up duplicate in-flight batches.

use std::sync::Arc;

use async_trait::async_trait;
use bson::oid::ObjectId;
use chrono::Utc;
use futures_util::TryStreamExt;
use uuid::Uuid;

use crate::db::collections;
use crate::domain::{
    Batch, BatchMetadata, BatchRequestRecord, BatchStatus, BillingProfile, Prompt, ProcessingStats,
};
use crate::entitlements::EntitlementsService;
use crate::error::{CoreError, CoreResult};
use crate::logging::log_info;
use crate::model_catalog::{active_models, ModelSpec, ProviderTag};
use crate::providers::BatchProvider;
use crate::scheduler::{JobContext, JobHandler};

pub struct BatchSubmitterJob {
    providers: Vec<(ProviderTag, Arc<dyn BatchProvider>)>,
}

impl BatchSubmitterJob {
    pub fn new(providers: Vec<(ProviderTag, Arc<dyn BatchProvider>)>) -> Self {
        Self { providers }
    }

    fn provider_for(&self, tag: ProviderTag) -> Option<&Arc<dyn BatchProvider>> {
        self.providers.iter().find(|(t, _)| *t == tag).map(|(_, p)| p)
    }
}

#[async_trait]
impl JobHandler for BatchSubmitterJob {
    async fn run(&self, ctx: &JobContext) -> CoreResult<()> {
        let workspace_id = ctx
            .workspace_id
            .ok_or_else(|| CoreError::invariant("batch submitter requires a workspace context"))?;

        let workspace_db = ctx.db.for_workspace(&workspace_id);
        let shared_db = ctx.db.shared();

        let billing_profile: BillingProfile = collections::billing_profiles(&shared_db)
            .find_one(bson::doc! { "workspaceId": workspace_id })
            .await?
            .ok_or_else(|| CoreError::invariant(format!("no billing profile for workspace {workspace_id}")))?;

        let prompts: Vec<Prompt> = collections::prompts(&workspace_db)
            .find(bson::doc! { "active": true })
            .await?
            .try_collect()
            .await
            .map_err(CoreError::from)?;

        if prompts.is_empty() {
            log_info!(workspace_id = %workspace_id, "no active prompts, skipping batch submission");
            return Ok(());
        }

        for (provider_tag, provider) in &self.providers {
            let existing_in_flight = collections::batches(&workspace_db)
                .find_one(bson::doc! {
                    "provider": provider_tag.to_string(),
                    "status": { "$nin": ["completed", "failed", "expired", "cancelled"] },
                })
                .await?;
            if existing_in_flight.is_some() {
                log_info!(workspace_id = %workspace_id, provider = %provider_tag, "in-flight batch already exists, skipping");
                continue;
            }

            submit_provider_batch(ctx, *provider_tag, provider.as_ref(), &prompts, &billing_profile, workspace_id).await?;
            ctx.touch().await?;
        }

        Ok(())
    }
}

async fn submit_provider_batch(
    ctx: &JobContext,
    provider_tag: ProviderTag,
    provider: &dyn BatchProvider,
    prompts: &[Prompt],
    billing_profile: &BillingProfile,
    workspace_id: ObjectId,
) -> CoreResult<()> {
    // The active model set for this provider, intersected with the billing
    // profile's entitled models.
    let models: Vec<&ModelSpec> = active_models()
        .filter(|m| m.provider == provider_tag && EntitlementsService::can_use_model(billing_profile, m.identifier))
        .collect();
    if models.is_empty() {
        log_info!(workspace_id = %workspace_id, provider = %provider_tag, "no entitled models for provider, skipping");
        return Ok(());
    }

    let mut lines = Vec::new();
    let mut requests = Vec::new();

    for prompt in prompts {
        let Some(prompt_id) = prompt.id else { continue };
        for model in &models {
            let custom_id = format!("{}-{}-{}", prompt_id, model.identifier, Uuid::new_v4());
            let line = provider.build_request_line(&custom_id, model, &prompt.text)?;
            lines.push(line);
            requests.push(BatchRequestRecord {
                custom_id,
                prompt_id,
                prompt_text: prompt.text.clone(),
                model_id: model.identifier.to_string(),
                model_display_name: model.display_name.to_string(),
            });
        }
    }

    if lines.is_empty() {
        return Ok(());
    }

    log_info!(
        workspace_id = %workspace_id,
        provider = %provider_tag,
        request_count = lines.len(),
        "submitting batch"
    );

    let provider_batch_id = provider.submit_batch(&lines).await?;

    let now = Utc::now();
    let batch = Batch {
        id: None,
        workspace_id,
        provider: provider_tag.to_string(),
        provider_batch_id: Some(provider_batch_id),
        status: BatchStatus::Submitted,
        metadata: BatchMetadata {
            requests,
            results: Vec::new(),
            processing_stats: ProcessingStats::default(),
        },
        is_processed: false,
        processed_at: None,
        created_at: now,
        updated_at: now,
        error: None,
    };

    let workspace_db = ctx.db.for_workspace(&workspace_id);
    collections::batches(&workspace_db).insert_one(batch).await?;
    Ok(())
}

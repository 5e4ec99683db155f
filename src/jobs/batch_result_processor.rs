//! Polls in-flight batches, fans completed results out into
//! [`crate::domain::AnswerRecord`]s, and runs one sentiment-analysis call
//! per answer covering every brand configured on the workspace.
//!
//! Guards against double-processing with `BatchResultRecord::is_processed`
//! and `Batch::is_processed`, and calls [`JobContext::touch`] between
//! sentiment calls so a workspace with many in-flight batches doesn't lose
//! its job lock mid-run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::oid::ObjectId;
use chrono::Utc;
use futures_util::TryStreamExt;

use crate::db::collections;
use crate::domain::{AnswerRecord, Batch, BatchResultRecord, BatchStatus, Brand};
use crate::error::{CoreError, CoreResult};
use crate::logging::{log_info, log_warn};
use crate::model_catalog::{self, ProviderTag};
use crate::providers::sentiment_provider::SentimentProvider;
use crate::providers::BatchProvider;
use crate::scheduler::{JobContext, JobHandler};

/// Minimum delay between consecutive sentiment-analysis calls, to stay
/// clear of per-minute provider rate limits when many answers need analysis
/// in one run.
const MIN_SENTIMENT_CALL_SPACING: Duration = Duration::from_millis(150);

pub struct BatchResultProcessorJob {
    providers: Vec<(ProviderTag, Arc<dyn BatchProvider>)>,
}

impl BatchResultProcessorJob {
    pub fn new(providers: Vec<(ProviderTag, Arc<dyn BatchProvider>)>) -> Self {
        Self { providers }
    }

    fn provider_for(&self, tag: &str) -> Option<&Arc<dyn BatchProvider>> {
        self.providers
            .iter()
            .find(|(t, _)| t.to_string() == tag)
            .map(|(_, p)| p)
    }
}

#[async_trait]
impl JobHandler for BatchResultProcessorJob {
    async fn run(&self, ctx: &JobContext) -> CoreResult<()> {
        let workspace_id = ctx
            .workspace_id
            .ok_or_else(|| CoreError::invariant("batch result processor requires a workspace context"))?;
        let workspace_db = ctx.db.for_workspace(&workspace_id);

        let in_flight: Vec<Batch> = collections::batches(&workspace_db)
            .find(bson::doc! { "isProcessed": false })
            .await?
            .try_collect()
            .await
            .map_err(CoreError::from)?;

        if in_flight.is_empty() {
            return Ok(());
        }

        let brands: Vec<Brand> = collections::brands(&workspace_db)
            .find(bson::doc! {})
            .await?
            .try_collect()
            .await
            .map_err(CoreError::from)?;

        for batch in in_flight {
            if let Err(e) = self.process_batch(ctx, workspace_id, batch, &brands).await {
                log_warn!(workspace_id = %workspace_id, error = %e, "failed to process batch");
            }
            ctx.touch().await?;
        }

        Ok(())
    }
}

impl BatchResultProcessorJob {
    async fn process_batch(
        &self,
        ctx: &JobContext,
        workspace_id: ObjectId,
        mut batch: Batch,
        brands: &[Brand],
    ) -> CoreResult<()> {
        let Some(batch_id) = batch.id else {
            return Err(CoreError::invariant("batch document missing _id"));
        };
        let Some(provider_batch_id) = batch.provider_batch_id.clone() else {
            return Err(CoreError::invariant("batch document missing providerBatchId"));
        };
        let Some(provider) = self.provider_for(&batch.provider) else {
            return Err(CoreError::not_supported(format!("no configured provider for {}", batch.provider)));
        };

        let poll = provider.poll_batch(&provider_batch_id).await?;
        let workspace_db = ctx.db.for_workspace(&workspace_id);

        if poll.status != BatchStatus::Completed {
            if poll.status.is_terminal() && poll.status != batch.status {
                batch.status = poll.status;
                batch.error = poll.error;
                batch.updated_at = Utc::now();
                collections::batches(&workspace_db)
                    .replace_one(bson::doc! { "_id": batch_id }, &batch)
                    .await?;
            }
            return Ok(());
        }

        let sentiment = SentimentProvider::new(provider.clone());
        let result_lines = provider.fetch_results(&provider_batch_id).await?;
        let mut saved_results = 0u32;
        let mut sentiment_failed = 0u32;

        for line in result_lines {
            if batch
                .metadata
                .results
                .iter()
                .any(|r| r.custom_id == line.custom_id && r.is_processed)
            {
                continue;
            }

            let Some(request) = batch.metadata.requests.iter().find(|r| r.custom_id == line.custom_id) else {
                log_warn!(custom_id = %line.custom_id, "result line has no matching request record");
                continue;
            };

            let model_id = request.model_id.clone();
            let model_display_name = request.model_display_name.clone();
            let prompt_id = request.prompt_id;
            let prompt_text = request.prompt_text.clone();

            if let Some(error) = &line.error {
                log_warn!(custom_id = %line.custom_id, error = %error, "batch result line reported an error");
                upsert_result_record(&mut batch, &line.custom_id, None, None, line.error.clone(), true);
                continue;
            }

            let Some(text) = line.text.clone() else {
                continue;
            };
            let token_count = line.token_count.unwrap_or_else(|| estimate_tokens(&text));

            let sentiment_analysis = if brands.is_empty() {
                None
            } else if let Some(model) = model_catalog::find(&model_id) {
                match sentiment.analyze(model, &text, brands).await {
                    Ok(analysis) => Some(analysis),
                    Err(e) => {
                        log_warn!(custom_id = %line.custom_id, error = %e, "sentiment analysis call failed");
                        sentiment_failed += 1;
                        None
                    }
                }
            } else {
                log_warn!(model_id = %model_id, "answer referenced a model not in the catalog");
                None
            };
            if sentiment_analysis
                .as_ref()
                .is_some_and(|a| a.overall_sentiment == crate::domain::SentimentVerdict::NotDetermined)
            {
                sentiment_failed += 1;
            }

            let answer = AnswerRecord {
                id: None,
                workspace_id,
                custom_id: line.custom_id.clone(),
                prompt_id,
                prompt_text,
                model_id,
                model_display_name,
                provider: batch.provider.clone(),
                batch_id,
                raw_text: text.clone(),
                token_count,
                response_time_ms: 0,
                sentiment_analysis,
                created_at: Utc::now(),
            };
            // Upsert keyed on `custom_id` rather than `insert_one`: a crash
            // between this write and the batch document's `replace_one`
            // below must not re-insert the same line on the next run.
            collections::answer_records(&workspace_db)
                .replace_one(bson::doc! { "customId": &line.custom_id }, &answer)
                .upsert(true)
                .await?;
            saved_results += 1;

            if !brands.is_empty() {
                tokio::time::sleep(MIN_SENTIMENT_CALL_SPACING).await;
            }

            upsert_result_record(&mut batch, &line.custom_id, Some(text), Some(token_count), None, true);
        }

        batch.status = BatchStatus::Completed;
        batch.is_processed = true;
        batch.processed_at = Some(Utc::now());
        batch.updated_at = Utc::now();
        batch.metadata.processing_stats.completed_requests = batch
            .metadata
            .results
            .iter()
            .filter(|r| r.is_processed && r.error.is_none())
            .count() as u32;
        batch.metadata.processing_stats.failed_requests =
            batch.metadata.results.iter().filter(|r| r.error.is_some()).count() as u32;
        batch.metadata.processing_stats.total_requests = batch.metadata.requests.len() as u32;
        batch.metadata.processing_stats.saved_results += saved_results;
        batch.metadata.processing_stats.sentiment_failed += sentiment_failed;

        collections::batches(&workspace_db)
            .replace_one(bson::doc! { "_id": batch_id }, &batch)
            .await?;

        log_info!(
            workspace_id = %workspace_id,
            batch_id = %batch_id,
            saved_results,
            "batch processing complete"
        );

        Ok(())
    }
}

fn upsert_result_record(
    batch: &mut Batch,
    custom_id: &str,
    raw_text: Option<String>,
    token_count: Option<u32>,
    error: Option<String>,
    is_processed: bool,
) {
    if let Some(existing) = batch.metadata.results.iter_mut().find(|r| r.custom_id == custom_id) {
        existing.raw_text = raw_text;
        existing.token_count = token_count;
        existing.error = error;
        existing.is_processed = is_processed;
    } else {
        batch.metadata.results.push(BatchResultRecord {
            custom_id: custom_id.to_string(),
            raw_text,
            token_count,
            error,
            is_processed,
        });
    }
}

/// Fallback token estimate when a provider omits usage data, using the same
/// `cl100k_base` tokenizer OpenAI's own models are encoded with.
fn estimate_tokens(text: &str) -> u32 {
    static ENCODER: once_cell::sync::Lazy<tiktoken_rs::CoreBPE> =
        once_cell::sync::Lazy::new(|| tiktoken_rs::cl100k_base().expect("cl100k_base tokenizer ranks are bundled"));
    ENCODER.encode_ordinary(text).len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_counts_tokens() {
        assert_eq!(estimate_tokens("three word count"), 3);
        assert_eq!(estimate_tokens(""), 0);
    }

    fn test_batch() -> Batch {
        Batch {
            id: None,
            workspace_id: ObjectId::new(),
            provider: "openai".to_string(),
            provider_batch_id: None,
            status: BatchStatus::InProgress,
            metadata: crate::domain::BatchMetadata {
                requests: vec![],
                results: vec![],
                processing_stats: Default::default(),
            },
            is_processed: false,
            processed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            error: None,
        }
    }

    #[test]
    fn upsert_result_record_inserts_new_entries() {
        let mut batch = test_batch();
        upsert_result_record(&mut batch, "req-1", Some("hi".to_string()), Some(1), None, true);
        assert_eq!(batch.metadata.results.len(), 1);
        upsert_result_record(&mut batch, "req-1", Some("updated".to_string()), Some(2), None, true);
        assert_eq!(batch.metadata.results.len(), 1);
        assert_eq!(batch.metadata.results[0].raw_text.as_deref(), Some("updated"));
    }

    #[test]
    fn upsert_result_record_is_idempotent_for_duplicate_notifications() {
        let mut batch = test_batch();
        upsert_result_record(&mut batch, "req-1", Some("a".to_string()), Some(1), None, true);
        upsert_result_record(&mut batch, "req-2", Some("b".to_string()), Some(1), None, true);
        upsert_result_record(&mut batch, "req-1", Some("a".to_string()), Some(1), None, true);
        assert_eq!(batch.metadata.results.len(), 2);
    }
}

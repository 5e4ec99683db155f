//! Worker process: polls in-flight batches, fans out completed results,
//! and runs sentiment analysis.

use std::sync::Arc;

use airank_core::db::collections;
use airank_core::jobs::batch_result_processor::BatchResultProcessorJob;
use airank_core::logging::{init_tracing, log_error, log_info};
use airank_core::scheduler::{JobCadence, Scheduler};
use airank_core::{Application, Settings};
use futures_util::TryStreamExt;

#[tokio::main]
async fn main() {
    init_tracing();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            log_error!(error = %e, "failed to load settings");
            std::process::exit(1);
        }
    };

    let app = match Application::bootstrap(settings).await {
        Ok(app) => app,
        Err(e) => {
            log_error!(error = %e, "failed to bootstrap application");
            std::process::exit(1);
        }
    };

    let workspace_ids = load_workspace_ids(&app).await;

    let mut scheduler = Scheduler::new(app.db.clone(), app.redis.clone(), app.settings.scheduler.clone());
    scheduler.define_job(
        "batch_result_processor",
        JobCadence::EverySeconds((app.settings.scheduler.poll_interval_ms / 1000).max(1)),
        Arc::new(BatchResultProcessorJob::new(app.providers.clone())),
    );

    log_info!(workspace_count = workspace_ids.len(), "starting worker");
    let handles = scheduler.start(workspace_ids);

    tokio::signal::ctrl_c().await.ok();
    log_info!("shutdown signal received");
    scheduler.stop();
    for handle in handles {
        let _ = handle.await;
    }
}

async fn load_workspace_ids(app: &Application) -> Vec<bson::oid::ObjectId> {
    match collections::workspaces(&app.db.shared()).find(bson::doc! {}).await {
        Ok(cursor) => cursor
            .try_collect::<Vec<_>>()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter_map(|w| w.id)
            .collect(),
        Err(e) => {
            log_error!(error = %e, "failed to load workspace list");
            Vec::new()
        }
    }
}

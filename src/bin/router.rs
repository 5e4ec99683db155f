//! Router process: bootstraps change streams for every active listener
//! rule and keeps them reconciled against rule changes.

use std::sync::Arc;
use std::time::Duration;

use airank_core::db::collections;
use airank_core::logging::{init_tracing, log_error, log_info, log_warn};
use airank_core::router::{sweeper, ChangeRouter};
use airank_core::scheduler::{EnqueueOptions, Scheduler};
use airank_core::{Application, Settings};
use bson::doc;
use futures_util::TryStreamExt;
use tokio::sync::watch;

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

    let scheduler = Arc::new(Scheduler::new(app.db.clone(), app.redis.clone(), app.settings.scheduler.clone()));

    let router = Arc::new(ChangeRouter::new(
        app.db.clone(),
        Arc::new({
            let scheduler = scheduler.clone();
            move |change| {
                let scheduler = scheduler.clone();
                tokio::spawn(async move {
                    let data = doc! {
                        "workspaceId": change.workspace_id,
                        "documentId": change.document_id.clone(),
                        "collection": &change.collection,
                        "operationType": format!("{:?}", change.operation).to_lowercase(),
                        "document": change.document.clone(),
                    };
                    if let Err(e) = scheduler.enqueue(&change.job_name, data, EnqueueOptions::new()).await {
                        log_error!(
                            job_name = %change.job_name,
                            workspace_id = %change.workspace_id,
                            error = %e,
                            "failed to enqueue job for matched change"
                        );
                    } else {
                        log_info!(
                            workspace_id = %change.workspace_id,
                            job_name = %change.job_name,
                            collection = %change.collection,
                            "enqueued job for matched change"
                        );
                    }
                });
            }
        }),
    ));

    for workspace_id in &workspace_ids {
        if let Err(e) = router.reconcile(*workspace_id).await {
            log_warn!(workspace_id = %workspace_id, error = %e, "initial reconciliation failed");
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep_interval = Duration::from_secs(app.settings.scheduler.sweep_interval_secs);
    let sweeper_handle = tokio::spawn(sweeper::run(router.clone(), workspace_ids, sweep_interval, shutdown_rx));

    log_info!("router started");
    tokio::signal::ctrl_c().await.ok();
    log_info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    router.shutdown().await;
    let _ = sweeper_handle.await;
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

//! Process-wide application state, shared by every binary entrypoint.

use std::sync::Arc;

use redis::aio::ConnectionManager;

use crate::config::Settings;
use crate::db::Database;
use crate::error::CoreResult;
use crate::model_catalog::ProviderTag;
use crate::providers::gemini::GeminiProvider;
use crate::providers::openai::OpenAiProvider;
use crate::providers::BatchProvider;
use crate::rate_limit::RateLimitRegistry;

/// Everything a binary needs to construct its subsystem(s): a database
/// handle, a Redis connection manager (distributed locks, rate limiting),
/// and the set of providers this deployment has credentials for.
pub struct Application {
    pub settings: Settings,
    pub db: Database,
    pub redis: ConnectionManager,
    pub providers: Vec<(ProviderTag, Arc<dyn BatchProvider>)>,
    pub rate_limits: Arc<RateLimitRegistry>,
}

impl Application {
    pub async fn bootstrap(settings: Settings) -> CoreResult<Self> {
        let db = Database::connect(&settings.mongodb_connection_string()).await?;

        let client = redis::Client::open(settings.redis_url.clone()).map_err(crate::error::CoreError::from)?;
        let redis = ConnectionManager::new(client).await.map_err(crate::error::CoreError::from)?;

        let mut providers: Vec<(ProviderTag, Arc<dyn BatchProvider>)> = Vec::new();
        if let Some(openai_credentials) = settings.openai.clone() {
            providers.push((ProviderTag::OpenAi, Arc::new(OpenAiProvider::new(openai_credentials)?)));
        }
        if let Some(gcp_credentials) = settings.gcp.clone() {
            providers.push((ProviderTag::Gemini, Arc::new(GeminiProvider::new(gcp_credentials)?)));
        }

        let rate_limits = Arc::new(RateLimitRegistry::new(60));

        Ok(Self {
            settings,
            db,
            redis,
            providers,
            rate_limits,
        })
    }
}

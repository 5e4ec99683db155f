//! Process configuration, loaded from environment variables.
//!
//! One `from_env()` entry point, validated eagerly; optional pieces default
//! to disabled rather than erroring.

use crate::error::{CoreError, CoreResult};
use crate::logging::log_debug;

/// Top-level process settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mongodb_uri: String,
    pub mongodb_params: Option<String>,
    pub redis_url: String,
    pub openai: Option<OpenAiCredentials>,
    pub gcp: Option<GcpCredentials>,
    pub batch_webhook_url: Option<String>,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone)]
pub struct OpenAiCredentials {
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct GcpCredentials {
    pub project_id: String,
    pub region: String,
    pub batch_bucket: Option<String>,
    pub pubsub_topic: Option<String>,
    pub pubsub_subscription: Option<String>,
}

/// Scheduler-wide knobs: overall job concurrency plus the tick and sweep
/// intervals the scheduler loop runs on.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_concurrency: usize,
    pub poll_interval_ms: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            poll_interval_ms: 5_000,
            sweep_interval_secs: 60,
        }
    }
}

impl Settings {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] if `MONGODB_URI` is missing —
    /// every other variable is optional and disables the corresponding
    /// provider/feature gracefully when absent.
    pub fn from_env() -> CoreResult<Self> {
        let mongodb_uri = std::env::var("MONGODB_URI")
            .map_err(|_| CoreError::configuration("MONGODB_URI is required"))?;
        let mongodb_params = std::env::var("MONGODB_PARAMS").ok();
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let openai = std::env::var("OPENAI_API_KEY")
            .ok()
            .map(|api_key| OpenAiCredentials { api_key });

        let gcp = std::env::var("GCP_PROJECT_ID").ok().map(|project_id| {
            let region = std::env::var("GCP_REGION").unwrap_or_else(|_| "us-central1".to_string());
            GcpCredentials {
                project_id,
                region,
                batch_bucket: std::env::var("GCS_BATCH_BUCKET").ok(),
                pubsub_topic: std::env::var("PUBSUB_BATCH_TOPIC").ok(),
                pubsub_subscription: std::env::var("PUBSUB_BATCH_SUBSCRIPTION").ok(),
            }
        });

        let batch_webhook_url = std::env::var("BATCH_WEBHOOK_URL").ok();

        log_debug!(
            has_openai = openai.is_some(),
            has_gcp = gcp.is_some(),
            has_webhook = batch_webhook_url.is_some(),
            "loaded settings from environment"
        );

        Ok(Self {
            mongodb_uri,
            mongodb_params,
            redis_url,
            openai,
            gcp,
            batch_webhook_url,
            scheduler: SchedulerSettings::default(),
        })
    }

    /// Full Mongo connection string, with query params appended if configured.
    pub fn mongodb_connection_string(&self) -> String {
        match &self.mongodb_params {
            Some(params) if !params.is_empty() => format!("{}?{}", self.mongodb_uri, params),
            _ => self.mongodb_uri.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "MONGODB_URI",
            "MONGODB_PARAMS",
            "REDIS_URL",
            "OPENAI_API_KEY",
            "GCP_PROJECT_ID",
            "GCP_REGION",
            "GCS_BATCH_BUCKET",
            "PUBSUB_BATCH_TOPIC",
            "PUBSUB_BATCH_SUBSCRIPTION",
            "BATCH_WEBHOOK_URL",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn missing_mongodb_uri_is_an_error() {
        clear_env();
        assert!(Settings::from_env().is_err());
    }

    #[test]
    #[serial]
    fn absent_provider_credentials_disable_gracefully() {
        clear_env();
        std::env::set_var("MONGODB_URI", "mongodb://localhost:27017");
        let settings = Settings::from_env().unwrap();
        assert!(settings.openai.is_none());
        assert!(settings.gcp.is_none());
        clear_env();
    }

    #[test]
    #[serial]
    fn mongodb_params_are_appended() {
        clear_env();
        std::env::set_var("MONGODB_URI", "mongodb://localhost:27017");
        std::env::set_var("MONGODB_PARAMS", "retryWrites=true");
        let settings = Settings::from_env().unwrap();
        assert_eq!(
            settings.mongodb_connection_string(),
            "mongodb://localhost:27017?retryWrites=true"
        );
        clear_env();
    }
}

//! Rolling-window rate limiting per provider/workspace pair.
//!
//! Keyed by `(ProviderTag, String)` so each workspace's usage of a provider
//! is throttled independently.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter};
use tokio::sync::Mutex;

use crate::model_catalog::ProviderTag;

type Limiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// A registry of rolling-window limiters, one per `(provider, workspace)` key.
pub struct RateLimitRegistry {
    quota: Quota,
    limiters: Mutex<HashMap<(ProviderTag, String), Arc<Limiter>>>,
}

impl RateLimitRegistry {
    /// `requests_per_minute` is the rolling-window budget applied to every
    /// distinct `(provider, workspace)` pair.
    pub fn new(requests_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute.max(1)).expect("requests_per_minute is nonzero");
        Self {
            quota: Quota::per_minute(per_minute),
            limiters: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for(&self, provider: ProviderTag, workspace_key: &str) -> Arc<Limiter> {
        let mut limiters = self.limiters.lock().await;
        limiters
            .entry((provider, workspace_key.to_string()))
            .or_insert_with(|| Arc::new(RateLimiter::direct(self.quota)))
            .clone()
    }

    /// Returns `true` if a call is currently permitted without reserving it.
    pub async fn would_allow(&self, provider: ProviderTag, workspace_key: &str) -> bool {
        let limiter = self.limiter_for(provider, workspace_key).await;
        limiter.check().is_ok()
    }

    /// Blocks until the next call is permitted, then reserves it.
    pub async fn acquire(&self, provider: ProviderTag, workspace_key: &str) {
        let limiter = self.limiter_for(provider, workspace_key).await;
        limiter.until_ready().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn distinct_workspaces_are_throttled_independently() {
        let registry = RateLimitRegistry::new(1);
        assert!(registry.would_allow(ProviderTag::OpenAi, "workspace-a").await);
        registry.acquire(ProviderTag::OpenAi, "workspace-a").await;
        assert!(!registry.would_allow(ProviderTag::OpenAi, "workspace-a").await);
        assert!(registry.would_allow(ProviderTag::OpenAi, "workspace-b").await);
    }

    #[tokio::test]
    async fn distinct_providers_for_the_same_workspace_are_independent() {
        let registry = RateLimitRegistry::new(1);
        registry.acquire(ProviderTag::OpenAi, "workspace-a").await;
        assert!(registry.would_allow(ProviderTag::Gemini, "workspace-a").await);
    }
}

//! Plan limits and usage accounting.
//!
//! Entitlement checks return a plain [`Decision`] rather than a
//! [`crate::error::CoreError`] — a denial is an expected business outcome,
//! not a failure, and is never written to persistent error state. This
//! mirrors [`crate::error::CoreError`]'s own separation between things that
//! went wrong and ordinary `Result::Ok` control flow, favorable or not.
//!
//! Usage counters are mutated through `$inc` updates issued straight at the
//! `billingProfiles` collection rather than read-modify-write on an
//! in-memory [`BillingProfile`] — two concurrent `incrementUsage` calls for
//! the same workspace must not race each other into losing an increment.

use bson::oid::ObjectId;
use chrono::{DateTime, Months, Utc};
use mongodb::Database as MongoDatabase;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::db::collections;
use crate::domain::BillingProfile;
use crate::error::{CoreError, CoreResult};
use crate::model_catalog::{active_models, ProviderTag};

/// Subscription tier. A tagged enum in place of a free-form plan-name
/// string, so an unrecognized value fails to deserialize instead of
/// silently falling through to unlimited access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanId {
    Free,
    Small,
    Medium,
    Enterprise,
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Free => "free",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Enterprise => "enterprise",
        };
        write!(f, "{s}")
    }
}

/// How often a plan's scheduled jobs run, and how often its prompt-usage
/// window resets. Distinct from [`crate::scheduler::JobCadence`], which is
/// a fixed-tick interval rather than a billing concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCadence {
    Monthly,
    Daily,
}

impl std::fmt::Display for BillingCadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Monthly => "monthly",
            Self::Daily => "daily",
        };
        write!(f, "{s}")
    }
}

/// A resource whose usage counter lives on the billing profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Prompt,
    Brand,
    Model,
}

impl Resource {
    fn used_field(self) -> &'static str {
        match self {
            Self::Prompt => "promptsUsed",
            Self::Brand => "brandsUsed",
            Self::Model => "modelsUsed",
        }
    }

    fn limit_field(self) -> &'static str {
        match self {
            Self::Prompt => "promptsLimit",
            Self::Brand => "brandsLimit",
            Self::Model => "modelsLimit",
        }
    }
}

/// Resource limits attached to a plan.
#[derive(Debug, Clone, Copy)]
pub struct PlanLimits {
    pub max_prompts: u32,
    pub max_brands: u32,
    pub max_models: u32,
    pub prompt_character_limit: u32,
    pub cadence: BillingCadence,
    pub data_retention_days: Option<u32>,
    pub allowed_providers: &'static [ProviderTag],
}

impl PlanLimits {
    fn limit_for(self, resource: Resource) -> u32 {
        match resource {
            Resource::Prompt => self.max_prompts,
            Resource::Brand => self.max_brands,
            Resource::Model => self.max_models,
        }
    }
}

/// Plan catalog, indexed by [`PlanId`]. Kept as a static table for the same
/// reason as [`crate::model_catalog::MODEL_CATALOG`]: these limits change
/// rarely enough that a database round trip on every admission check would
/// be pure overhead.
///
/// Values are canonical per the plan table: free(1/4/1), small(4/10/3),
/// medium(10/20/12), enterprise(unbounded); every plan shares a 150-character
/// prompt limit. The provider-availability split (free is OpenAI-only; every
/// paid tier gets both providers) has no column of its own in that table —
/// it is this crate's own extension, kept from the original draft.
pub static PLAN_CATALOG: Lazy<[(PlanId, PlanLimits); 4]> = Lazy::new(|| {
    [
        (
            PlanId::Free,
            PlanLimits {
                max_prompts: 4,
                max_brands: 1,
                max_models: 1,
                prompt_character_limit: 150,
                cadence: BillingCadence::Monthly,
                data_retention_days: Some(30),
                allowed_providers: &[ProviderTag::OpenAi],
            },
        ),
        (
            PlanId::Small,
            PlanLimits {
                max_prompts: 10,
                max_brands: 4,
                max_models: 3,
                prompt_character_limit: 150,
                cadence: BillingCadence::Daily,
                data_retention_days: Some(90),
                allowed_providers: &[ProviderTag::OpenAi, ProviderTag::Gemini],
            },
        ),
        (
            PlanId::Medium,
            PlanLimits {
                max_prompts: 20,
                max_brands: 10,
                max_models: 12,
                prompt_character_limit: 150,
                cadence: BillingCadence::Daily,
                data_retention_days: Some(180),
                allowed_providers: &[ProviderTag::OpenAi, ProviderTag::Gemini],
            },
        ),
        (
            PlanId::Enterprise,
            PlanLimits {
                max_prompts: u32::MAX,
                max_brands: u32::MAX,
                max_models: u32::MAX,
                prompt_character_limit: 150,
                cadence: BillingCadence::Daily,
                data_retention_days: None,
                allowed_providers: &[ProviderTag::OpenAi, ProviderTag::Gemini],
            },
        ),
    ]
});

pub fn limits_for(plan: PlanId) -> PlanLimits {
    PLAN_CATALOG
        .iter()
        .find(|(id, _)| *id == plan)
        .map(|(_, limits)| *limits)
        .expect("every PlanId variant has a catalog entry")
}

/// Outcome of an entitlement check. Never routed through [`crate::error::CoreError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied {
        reason: String,
        limit: u32,
        used: u32,
        reset_at: Option<DateTime<Utc>>,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Admission checks and usage accounting against a workspace's [`BillingProfile`].
pub struct EntitlementsService;

impl EntitlementsService {
    /// Allowed iff `len(phrase) <= promptCharacterLimit` and the prompt
    /// counter has room. Does not itself call [`Self::maybe_reset_usage`] —
    /// callers load the profile, reset it if due, then check.
    pub fn can_create_prompt(profile: &BillingProfile, phrase: &str, now: DateTime<Utc>) -> Decision {
        if phrase.chars().count() > profile.prompt_character_limit as usize {
            return Decision::Denied {
                reason: "prompt exceeds character limit for plan".to_string(),
                limit: profile.prompt_character_limit,
                used: phrase.chars().count() as u32,
                reset_at: None,
            };
        }
        if profile.prompts_used < profile.prompts_limit {
            Decision::Allowed
        } else {
            let _ = now;
            Decision::Denied {
                reason: "Prompt limit reached".to_string(),
                limit: profile.prompts_limit,
                used: profile.prompts_used,
                reset_at: Some(profile.prompts_reset_date),
            }
        }
    }

    pub fn can_create_brand(profile: &BillingProfile) -> Decision {
        if profile.brands_used < profile.brands_limit {
            Decision::Allowed
        } else {
            Decision::Denied {
                reason: "brand limit reached for plan".to_string(),
                limit: profile.brands_limit,
                used: profile.brands_used,
                reset_at: None,
            }
        }
    }

    pub fn can_create_model(profile: &BillingProfile) -> Decision {
        if profile.models_used < profile.models_limit {
            Decision::Allowed
        } else {
            Decision::Denied {
                reason: "model limit reached for plan".to_string(),
                limit: profile.models_limit,
                used: profile.models_used,
                reset_at: None,
            }
        }
    }

    /// `canUseModel(workspaceId, modelId) -> boolean`, checked against the
    /// profile's own derived `allowedModels` rather than re-deriving it from
    /// the plan on every call.
    pub fn can_use_model(profile: &BillingProfile, model_id: &str) -> bool {
        profile.allowed_models.iter().any(|m| m == model_id)
    }

    /// Atomic counter bump. Guarded by a `$gt: 0` filter on decrement so a
    /// racing decrement below zero is simply skipped rather than underflowing.
    pub async fn increment_usage(db: &MongoDatabase, workspace_id: ObjectId, resource: Resource) -> CoreResult<()> {
        collections::billing_profiles(db)
            .update_one(
                bson::doc! { "workspaceId": workspace_id },
                bson::doc! { "$inc": { resource.used_field(): 1i32 } },
            )
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }

    pub async fn decrement_usage(db: &MongoDatabase, workspace_id: ObjectId, resource: Resource) -> CoreResult<()> {
        collections::billing_profiles(db)
            .update_one(
                bson::doc! { "workspaceId": workspace_id, resource.used_field(): { "$gt": 0i32 } },
                bson::doc! { "$inc": { resource.used_field(): -1i32 } },
            )
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }

    /// Writes every plan-derived field onto the profile and recomputes
    /// `nextJobRunDate`. Idempotent: re-applying the same plan writes the
    /// same derived values (`updatedAt` is the only field that changes).
    pub async fn apply_plan(
        db: &MongoDatabase,
        profile_id: ObjectId,
        plan: PlanId,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let limits = limits_for(plan);
        let allowed_models = allowed_model_identifiers(&limits);
        let next_job_run_date = next_run_date(limits.cadence, now);

        collections::billing_profiles(db)
            .update_one(
                bson::doc! { "_id": profile_id },
                bson::doc! { "$set": {
                    "currentPlan": plan.to_string(),
                    "brandsLimit": limits.max_brands as i64,
                    "promptsLimit": limits.max_prompts as i64,
                    "modelsLimit": limits.max_models as i64,
                    "allowedModels": allowed_models,
                    "promptCharacterLimit": limits.prompt_character_limit as i64,
                    "jobCadence": limits.cadence.to_string(),
                    "dataRetentionDays": limits.data_retention_days.map(|d| d as i64),
                    "nextJobRunDate": next_job_run_date,
                    "updatedAt": now,
                } },
            )
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }

    /// For monthly-cadence plans, resets `promptsUsed` and advances
    /// `promptsResetDate` by one month once it has elapsed. Daily-cadence
    /// plans have no reset window and are left untouched. Mutates `profile`
    /// in place and persists the same change, so callers that already hold
    /// a loaded profile never observe a stale in-memory copy after calling
    /// this.
    pub async fn maybe_reset_usage(db: &MongoDatabase, profile: &mut BillingProfile, now: DateTime<Utc>) -> CoreResult<bool> {
        if profile.job_cadence != BillingCadence::Monthly {
            return Ok(false);
        }
        if profile.prompts_reset_date > now {
            return Ok(false);
        }

        let next_reset = profile
            .prompts_reset_date
            .checked_add_months(Months::new(1))
            .unwrap_or(profile.prompts_reset_date);

        collections::billing_profiles(db)
            .update_one(
                bson::doc! { "workspaceId": profile.workspace_id },
                bson::doc! { "$set": { "promptsUsed": 0i32, "promptsResetDate": next_reset } },
            )
            .await
            .map_err(CoreError::from)?;

        profile.prompts_used = 0;
        profile.prompts_reset_date = next_reset;
        Ok(true)
    }
}

/// Subset of the active model catalog this plan grants access to: every
/// active model from an allowed provider, in catalog order, truncated to
/// `maxModels`. Plan tiers define per-plan counts, not exact model
/// identifiers, so this is the crate's own resolution of that gap.
fn allowed_model_identifiers(limits: &PlanLimits) -> Vec<String> {
    active_models()
        .filter(|m| limits.allowed_providers.contains(&m.provider))
        .take(limits.max_models as usize)
        .map(|m| m.identifier.to_string())
        .collect()
}

fn next_run_date(cadence: BillingCadence, now: DateTime<Utc>) -> DateTime<Utc> {
    match cadence {
        BillingCadence::Monthly => now.checked_add_months(Months::new(1)).unwrap_or(now),
        BillingCadence::Daily => now + chrono::Duration::days(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(plan: PlanId) -> BillingProfile {
        let limits = limits_for(plan);
        let now = Utc::now();
        BillingProfile {
            id: None,
            workspace_id: ObjectId::new(),
            current_plan: plan,
            brands_limit: limits.max_brands,
            prompts_limit: limits.max_prompts,
            models_limit: limits.max_models,
            allowed_models: allowed_model_identifiers(&limits),
            prompt_character_limit: limits.prompt_character_limit,
            job_cadence: limits.cadence,
            data_retention_days: limits.data_retention_days,
            brands_used: 0,
            prompts_used: 0,
            models_used: 0,
            prompts_reset_date: now,
            next_job_run_date: None,
            updated_at: now,
        }
    }

    #[test]
    fn free_plan_matches_the_canonical_table() {
        let limits = limits_for(PlanId::Free);
        assert_eq!(limits.max_prompts, 4);
        assert_eq!(limits.max_brands, 1);
        assert_eq!(limits.max_models, 1);
        assert_eq!(limits.prompt_character_limit, 150);
        assert_eq!(limits.cadence, BillingCadence::Monthly);
    }

    #[test]
    fn small_and_medium_plans_match_the_canonical_table() {
        let small = limits_for(PlanId::Small);
        assert_eq!((small.max_prompts, small.max_brands, small.max_models), (10, 4, 3));
        let medium = limits_for(PlanId::Medium);
        assert_eq!((medium.max_prompts, medium.max_brands, medium.max_models), (20, 10, 12));
    }

    #[test]
    fn prompt_limit_denies_once_reached_with_reset_at_populated() {
        let mut profile = profile(PlanId::Free);
        profile.prompts_used = profile.prompts_limit;
        let decision = EntitlementsService::can_create_prompt(&profile, "short prompt", Utc::now());
        match decision {
            Decision::Denied { reason, limit, used, reset_at } => {
                assert_eq!(reason, "Prompt limit reached");
                assert_eq!(limit, used);
                assert!(reset_at.is_some());
            }
            Decision::Allowed => panic!("expected denial"),
        }
    }

    #[test]
    fn prompt_at_exactly_the_character_limit_is_allowed() {
        let profile = profile(PlanId::Free);
        let phrase: String = "a".repeat(profile.prompt_character_limit as usize);
        assert!(EntitlementsService::can_create_prompt(&profile, &phrase, Utc::now()).is_allowed());
    }

    #[test]
    fn prompt_one_character_over_the_limit_is_rejected() {
        let profile = profile(PlanId::Free);
        let phrase: String = "a".repeat(profile.prompt_character_limit as usize + 1);
        assert!(!EntitlementsService::can_create_prompt(&profile, &phrase, Utc::now()).is_allowed());
    }

    #[test]
    fn enterprise_plan_has_no_practical_ceiling() {
        let profile = profile(PlanId::Enterprise);
        assert!(EntitlementsService::can_create_prompt(&profile, "anything", Utc::now()).is_allowed());
        assert!(EntitlementsService::can_create_brand(&profile).is_allowed());
    }

    #[test]
    fn can_use_model_checks_the_profiles_own_allowed_list() {
        let profile = profile(PlanId::Free);
        assert!(!profile.allowed_models.is_empty());
        let allowed = profile.allowed_models[0].clone();
        assert!(EntitlementsService::can_use_model(&profile, &allowed));
        assert!(!EntitlementsService::can_use_model(&profile, "not-a-real-model"));
    }

    #[test]
    fn free_plan_only_resolves_openai_models() {
        let limits = limits_for(PlanId::Free);
        let models = allowed_model_identifiers(&limits);
        for id in &models {
            let spec = crate::model_catalog::find(id).expect("resolved model stays in the catalog");
            assert_eq!(spec.provider, ProviderTag::OpenAi);
        }
    }

    #[test]
    fn next_run_date_advances_by_the_plans_cadence() {
        let now = Utc::now();
        let monthly = next_run_date(BillingCadence::Monthly, now);
        assert!(monthly > now + chrono::Duration::days(27));
        let daily = next_run_date(BillingCadence::Daily, now);
        assert_eq!(daily, now + chrono::Duration::days(1));
    }
}

//! Static catalog of LLM models available for brand-ranking prompts.
//!
//! Uses `once_cell::sync::Lazy` for process-wide static data — here it
//! caches a table that would otherwise require a database round trip on
//! every job tick.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Which provider backend a model is served through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTag {
    OpenAi,
    Gemini,
}

impl std::fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

/// Lifecycle status of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    /// Still offered for new prompts.
    Active,
    /// Retained so existing `AnswerRecord`s keep a resolvable `modelId`, but
    /// no longer scheduled for new batches.
    Historic,
}

/// Per-model defaults for request construction.
#[derive(Debug, Clone, Copy)]
pub struct GenerationDefaults {
    pub temperature: Option<f32>,
    /// `o1`-class models reject `max_tokens` and require `max_completion_tokens`.
    pub uses_completion_token_limit: bool,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub identifier: &'static str,
    pub display_name: &'static str,
    pub provider: ProviderTag,
    pub status: ModelStatus,
    pub generation: GenerationDefaults,
}

/// The full set of models this pipeline knows how to schedule or resolve.
///
/// New models are added here; existing entries are only ever demoted to
/// [`ModelStatus::Historic`], never removed, so that `AnswerRecord.modelId`
/// values remain resolvable for as long as the records exist.
pub static MODEL_CATALOG: Lazy<Vec<ModelSpec>> = Lazy::new(|| {
    vec![
        ModelSpec {
            identifier: "gpt-4o",
            display_name: "GPT-4o",
            provider: ProviderTag::OpenAi,
            status: ModelStatus::Active,
            generation: GenerationDefaults {
                temperature: Some(0.2),
                uses_completion_token_limit: false,
                max_output_tokens: 2048,
            },
        },
        ModelSpec {
            identifier: "gpt-4o-mini",
            display_name: "GPT-4o mini",
            provider: ProviderTag::OpenAi,
            status: ModelStatus::Active,
            generation: GenerationDefaults {
                temperature: Some(0.2),
                uses_completion_token_limit: false,
                max_output_tokens: 2048,
            },
        },
        ModelSpec {
            identifier: "o1-mini",
            display_name: "o1-mini",
            provider: ProviderTag::OpenAi,
            status: ModelStatus::Active,
            generation: GenerationDefaults {
                temperature: None,
                uses_completion_token_limit: true,
                max_output_tokens: 4096,
            },
        },
        ModelSpec {
            identifier: "gemini-1.5-pro",
            display_name: "Gemini 1.5 Pro",
            provider: ProviderTag::Gemini,
            status: ModelStatus::Active,
            generation: GenerationDefaults {
                temperature: Some(0.2),
                uses_completion_token_limit: false,
                max_output_tokens: 2048,
            },
        },
        ModelSpec {
            identifier: "gemini-1.5-flash",
            display_name: "Gemini 1.5 Flash",
            provider: ProviderTag::Gemini,
            status: ModelStatus::Active,
            generation: GenerationDefaults {
                temperature: Some(0.2),
                uses_completion_token_limit: false,
                max_output_tokens: 2048,
            },
        },
        ModelSpec {
            identifier: "gpt-4",
            display_name: "GPT-4",
            provider: ProviderTag::OpenAi,
            status: ModelStatus::Historic,
            generation: GenerationDefaults {
                temperature: Some(0.2),
                uses_completion_token_limit: false,
                max_output_tokens: 2048,
            },
        },
    ]
});

/// Look up a catalog entry by its identifier.
pub fn find(identifier: &str) -> Option<&'static ModelSpec> {
    MODEL_CATALOG.iter().find(|m| m.identifier == identifier)
}

/// All models currently eligible for scheduling into new batches.
pub fn active_models() -> impl Iterator<Item = &'static ModelSpec> {
    MODEL_CATALOG
        .iter()
        .filter(|m| matches!(m.status, ModelStatus::Active))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn historic_models_remain_resolvable() {
        let gpt4 = find("gpt-4").expect("historic model must remain in the catalog");
        assert_eq!(gpt4.status, ModelStatus::Historic);
    }

    #[test]
    fn active_models_excludes_historic() {
        assert!(active_models().all(|m| matches!(m.status, ModelStatus::Active)));
    }

    #[test]
    fn o1_class_uses_completion_token_limit() {
        let o1 = find("o1-mini").unwrap();
        assert!(o1.generation.uses_completion_token_limit);
        assert!(o1.generation.temperature.is_none());
    }

    #[test]
    fn unknown_identifier_resolves_to_none() {
        assert!(find("not-a-real-model").is_none());
    }
}

use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::BrandKind;

/// Outcome of asking a model whether a brand was portrayed favorably.
///
/// `NotDetermined` is the explicit default used when the sentiment LLM's
/// reply can't be parsed (see [`crate::sentiment_prompt::parse_reply`]),
/// rather than silently dropping the record or guessing a polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentVerdict {
    Positive,
    Neutral,
    Negative,
    NotDetermined,
}

impl std::fmt::Display for SentimentVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
            Self::NotDetermined => "not_determined",
        };
        write!(f, "{s}")
    }
}

/// One brand's mention/sentiment within a single answer, as judged by the
/// sentiment model for that answer's text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandSentiment {
    pub brand_id: ObjectId,
    pub brand_keywords: String,
    pub kind: BrandKind,
    pub mentioned: bool,
    pub sentiment: SentimentVerdict,
    /// 1-based order of first appearance among mentioned brands; `None` for
    /// brands not mentioned at all.
    pub position: Option<u32>,
}

/// Embedded on [`crate::domain::AnswerRecord`] — not its own collection.
/// Carries a verdict for every brand configured on the workspace at
/// analysis time, mentioned or not, plus an aggregate read of the answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentAnalysis {
    pub brands: Vec<BrandSentiment>,
    pub overall_sentiment: SentimentVerdict,
    pub analyzed_at: DateTime<Utc>,
    pub analyzed_by: String,
}

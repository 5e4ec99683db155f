//! Thin adapter that runs a sentiment-analysis prompt through a
//! [`BatchProvider`]'s synchronous completion path and decodes the reply
//! into a [`SentimentAnalysis`].

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{Brand, SentimentAnalysis};
use crate::error::CoreResult;
use crate::model_catalog::ModelSpec;
use crate::sentiment_prompt;

use super::BatchProvider;

/// Runs one sentiment-analysis call covering every brand on the workspace
/// and returns the assembled [`SentimentAnalysis`].
pub struct SentimentProvider {
    provider: Arc<dyn BatchProvider>,
}

impl SentimentProvider {
    pub fn new(provider: Arc<dyn BatchProvider>) -> Self {
        Self { provider }
    }

    pub async fn analyze(
        &self,
        model: &ModelSpec,
        answer_text: &str,
        brands: &[Brand],
    ) -> CoreResult<SentimentAnalysis> {
        let prompt_text = sentiment_prompt::build_prompt(answer_text, brands);
        let raw = self.provider.complete_sync(model, &prompt_text).await?;
        let reply_text = self.provider.extract_text(&raw)?;
        let (brand_sentiments, overall_sentiment) = sentiment_prompt::parse_reply(&reply_text, brands);
        Ok(SentimentAnalysis {
            brands: brand_sentiments,
            overall_sentiment,
            analyzed_at: Utc::now(),
            analyzed_by: model.identifier.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BrandKind, SentimentVerdict};
    use crate::model_catalog::find;
    use async_trait::async_trait;
    use bson::oid::ObjectId;
    use serde_json::{json, Value};

    struct StubProvider {
        reply: String,
    }

    #[async_trait]
    impl BatchProvider for StubProvider {
        fn build_request_line(
            &self,
            _custom_id: &str,
            _model: &ModelSpec,
            _prompt_text: &str,
        ) -> CoreResult<super::super::BatchRequestLine> {
            unreachable!("not used in this test")
        }

        async fn submit_batch(&self, _lines: &[super::super::BatchRequestLine]) -> CoreResult<String> {
            unreachable!("not used in this test")
        }

        async fn poll_batch(&self, _provider_batch_id: &str) -> CoreResult<super::super::BatchPollResult> {
            unreachable!("not used in this test")
        }

        async fn fetch_results(&self, _provider_batch_id: &str) -> CoreResult<Vec<super::super::BatchResultLine>> {
            unreachable!("not used in this test")
        }

        fn extract_text(&self, raw_response: &Value) -> CoreResult<String> {
            Ok(raw_response["text"].as_str().unwrap().to_string())
        }

        async fn complete_sync(&self, _model: &ModelSpec, _prompt_text: &str) -> CoreResult<Value> {
            Ok(json!({ "text": self.reply }))
        }

        fn provider_name(&self) -> &'static str {
            "stub"
        }
    }

    fn brand(name: &str, kind: BrandKind) -> Brand {
        Brand {
            id: Some(ObjectId::new()),
            workspace_id: ObjectId::new(),
            name: name.to_string(),
            kind,
        }
    }

    #[tokio::test]
    async fn analyze_parses_a_well_formed_reply() {
        let provider = Arc::new(StubProvider {
            reply: r#"{"brands": [{"brandKeywords": "Acme", "mentioned": true, "sentiment": "positive", "position": 1}], "overallSentiment": "positive"}"#.to_string(),
        });
        let sentiment = SentimentProvider::new(provider);
        let brands = vec![brand("Acme", BrandKind::Own)];
        let model = find("gpt-4o").unwrap();
        let analysis = sentiment.analyze(model, "some answer text", &brands).await.unwrap();
        assert_eq!(analysis.overall_sentiment, SentimentVerdict::Positive);
        assert!(analysis.brands[0].mentioned);
        assert_eq!(analysis.brands[0].sentiment, SentimentVerdict::Positive);
        assert_eq!(analysis.analyzed_by, "gpt-4o");
    }

    #[tokio::test]
    async fn analyze_defaults_to_not_determined_on_garbage_reply() {
        let provider = Arc::new(StubProvider {
            reply: "I cannot answer that.".to_string(),
        });
        let sentiment = SentimentProvider::new(provider);
        let brands = vec![brand("Acme", BrandKind::Competitor)];
        let model = find("gpt-4o").unwrap();
        let analysis = sentiment.analyze(model, "some answer text", &brands).await.unwrap();
        assert_eq!(analysis.overall_sentiment, SentimentVerdict::NotDetermined);
        assert!(!analysis.brands[0].mentioned);
    }
}

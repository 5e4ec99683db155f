//! End-to-end test of the sentiment pipeline: prompt construction, a
//! provider's HTTP completion call, and reply parsing, wired together the
//! way [`airank_core::providers::sentiment_provider::SentimentProvider`]
//! does it, but against a [`wiremock::MockServer`] instead of a real model.

use std::sync::Arc;

use airank_core::config::OpenAiCredentials;
use airank_core::domain::{BrandKind, SentimentVerdict};
use airank_core::model_catalog::find;
use airank_core::providers::openai::OpenAiProvider;
use airank_core::providers::sentiment_provider::SentimentProvider;
use bson::oid::ObjectId;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn brand(name: &str, kind: BrandKind) -> airank_core::domain::Brand {
    airank_core::domain::Brand {
        id: Some(ObjectId::new()),
        workspace_id: ObjectId::new(),
        name: name.to_string(),
        kind,
    }
}

fn completion_body(reply_content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": reply_content}}],
        "usage": {"total_tokens": 42},
    })
}

#[tokio::test]
async fn analyzes_every_configured_brand_from_one_provider_call() {
    let mock_server = MockServer::start().await;
    let provider = Arc::new(
        OpenAiProvider::with_base_url(
            OpenAiCredentials { api_key: "test-key".to_string() },
            mock_server.uri(),
        )
        .unwrap(),
    );

    let reply = serde_json::json!({
        "brands": [
            {"brandKeywords": "Acme", "mentioned": true, "sentiment": "positive", "position": 1},
            {"brandKeywords": "Globex", "mentioned": true, "sentiment": "negative", "position": 2},
        ],
        "overallSentiment": "neutral",
    })
    .to_string();

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(&reply)))
        .mount(&mock_server)
        .await;

    let brands = vec![brand("Acme", BrandKind::Own), brand("Globex", BrandKind::Competitor)];
    let model = find("gpt-4o").unwrap();
    let sentiment = SentimentProvider::new(provider);

    let analysis = sentiment
        .analyze(model, "Acme beats Globex on every benchmark.", &brands)
        .await
        .unwrap();

    assert_eq!(analysis.overall_sentiment, SentimentVerdict::Neutral);
    assert_eq!(analysis.brands.len(), 2);
    let acme = analysis.brands.iter().find(|b| b.brand_keywords == "Acme").unwrap();
    assert!(acme.mentioned);
    assert_eq!(acme.sentiment, SentimentVerdict::Positive);
    assert_eq!(acme.position, Some(1));
    let globex = analysis.brands.iter().find(|b| b.brand_keywords == "Globex").unwrap();
    assert_eq!(globex.sentiment, SentimentVerdict::Negative);
    assert_eq!(globex.position, Some(2));
}

#[tokio::test]
async fn malformed_reply_falls_back_to_not_determined_for_every_brand() {
    let mock_server = MockServer::start().await;
    let provider = Arc::new(
        OpenAiProvider::with_base_url(
            OpenAiCredentials { api_key: "test-key".to_string() },
            mock_server.uri(),
        )
        .unwrap(),
    );

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("I can't help with that.")))
        .mount(&mock_server)
        .await;

    let brands = vec![brand("Acme", BrandKind::Own)];
    let model = find("gpt-4o").unwrap();
    let sentiment = SentimentProvider::new(provider);

    let analysis = sentiment.analyze(model, "some answer", &brands).await.unwrap();

    assert_eq!(analysis.overall_sentiment, SentimentVerdict::NotDetermined);
    assert!(!analysis.brands[0].mentioned);
    assert_eq!(analysis.brands[0].sentiment, SentimentVerdict::NotDetermined);
    assert_eq!(analysis.brands[0].position, None);
}

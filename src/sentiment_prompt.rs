//! Prompt construction and reply parsing for brand sentiment analysis.
//!
//! One call covers every brand configured on a workspace at once: the
//! prompt enumerates the exact brand list and their own/competitor types,
//! and the reply parser reuses [`crate::internals::json_extract`]'s
//! balanced-brace scan — sentiment replies share the same "JSON wrapped in
//! prose" shape most provider completions come back in.

use serde::Deserialize;

use crate::domain::{Brand, BrandKind, BrandSentiment, SentimentVerdict};
use crate::internals::json_extract;
use crate::logging::log_warn;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrandReply {
    brand_keywords: String,
    mentioned: bool,
    sentiment: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentimentReply {
    brands: Vec<BrandReply>,
    overall_sentiment: String,
}

/// Build the prompt sent to the sentiment model for one answer, covering
/// every configured brand in a single call.
pub fn build_prompt(answer_text: &str, brands: &[Brand]) -> String {
    let brand_list = brands
        .iter()
        .map(|b| {
            let role = match b.kind {
                BrandKind::Own => "own",
                BrandKind::Competitor => "competitor",
            };
            format!("- \"{}\" ({role})", b.name)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are evaluating how brands are portrayed in an AI model's answer.\n\
         Brands to evaluate (use exactly these strings, do not expand or rename them):\n\
         {brand_list}\n\n\
         Answer text:\n\"\"\"\n{answer_text}\n\"\"\"\n\n\
         Respond with a single JSON object of the form:\n\
         {{\"brands\": [{{\"brandKeywords\": \"<exact brand string>\", \"mentioned\": true|false, \
         \"sentiment\": \"positive\"|\"neutral\"|\"negative\", \"position\": <int or null>}}, ...], \
         \"overallSentiment\": \"positive\"|\"neutral\"|\"negative\"}}.\n\
         Include every brand listed above exactly once, even if not mentioned. \
         `position` is the 1-based order the brand first appears among mentioned brands, or null if not mentioned. \
         Use \"negative\" only when a brand is portrayed unfavorably, \"positive\" only when portrayed favorably, \
         and \"neutral\" otherwise.",
        brand_list = brand_list,
        answer_text = answer_text,
    )
}

fn parse_verdict(raw: &str) -> SentimentVerdict {
    match raw.to_lowercase().as_str() {
        "positive" => SentimentVerdict::Positive,
        "neutral" => SentimentVerdict::Neutral,
        "negative" => SentimentVerdict::Negative,
        other => {
            log_warn!(verdict = %other, "sentiment reply used an unrecognized verdict string");
            SentimentVerdict::NotDetermined
        }
    }
}

/// Parse a sentiment model's reply into a verdict per configured brand plus
/// an aggregate.
///
/// Never propagates a parse error: any reply with no parseable JSON object,
/// or whose shape doesn't match, falls back to every brand marked
/// `mentioned=false, sentiment=not_determined` and an overall verdict of
/// `not_determined` — a single bad reply from the sentiment model must not
/// fail the batch result processing job.
pub fn parse_reply(reply_text: &str, brands: &[Brand]) -> (Vec<BrandSentiment>, SentimentVerdict) {
    let cleaned = json_extract::clean_reply_artifacts(reply_text);
    let Some(json_str) = json_extract::extract_json_object(&cleaned) else {
        log_warn!(reply_preview = %truncate_preview(reply_text), "sentiment reply contained no JSON object");
        return (default_brand_sentiments(brands), SentimentVerdict::NotDetermined);
    };

    match serde_json::from_str::<SentimentReply>(&json_str) {
        Ok(parsed) => {
            let overall = parse_verdict(&parsed.overall_sentiment);
            let positions = first_appearance_positions(&parsed.brands);
            let brand_sentiments = brands
                .iter()
                .filter_map(|brand| {
                    let brand_id = brand.id?;
                    let matched = parsed
                        .brands
                        .iter()
                        .enumerate()
                        .find(|(_, r)| r.brand_keywords.trim().eq_ignore_ascii_case(brand.name.trim()));
                    Some(match matched {
                        Some((index, r)) => BrandSentiment {
                            brand_id,
                            brand_keywords: brand.name.clone(),
                            kind: brand.kind,
                            mentioned: r.mentioned,
                            sentiment: if r.mentioned {
                                parse_verdict(&r.sentiment)
                            } else {
                                SentimentVerdict::NotDetermined
                            },
                            position: if r.mentioned { positions[&index] } else { None },
                        },
                        None => default_brand_sentiment(brand, brand_id),
                    })
                })
                .collect();
            (brand_sentiments, overall)
        }
        Err(e) => {
            log_warn!(error = %e, json_str = %json_str, "sentiment reply JSON did not match expected shape");
            (default_brand_sentiments(brands), SentimentVerdict::NotDetermined)
        }
    }
}

/// Assigns monotonically increasing positions, starting at 1, to mentioned
/// brands in the order they first appear in the reply — the model's own
/// `position` field is never trusted, since it has no obligation to be
/// self-consistent. Returned map is keyed by index into `replies`.
fn first_appearance_positions(replies: &[BrandReply]) -> std::collections::HashMap<usize, Option<u32>> {
    let mut positions = std::collections::HashMap::with_capacity(replies.len());
    let mut next_position = 1u32;
    for (index, reply) in replies.iter().enumerate() {
        if reply.mentioned {
            positions.insert(index, Some(next_position));
            next_position += 1;
        } else {
            positions.insert(index, None);
        }
    }
    positions
}

fn default_brand_sentiment(brand: &Brand, brand_id: bson::oid::ObjectId) -> BrandSentiment {
    BrandSentiment {
        brand_id,
        brand_keywords: brand.name.clone(),
        kind: brand.kind,
        mentioned: false,
        sentiment: SentimentVerdict::NotDetermined,
        position: None,
    }
}

fn default_brand_sentiments(brands: &[Brand]) -> Vec<BrandSentiment> {
    brands
        .iter()
        .filter_map(|brand| brand.id.map(|id| default_brand_sentiment(brand, id)))
        .collect()
}

fn truncate_preview(text: &str) -> String {
    text.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;

    fn brand(name: &str, kind: BrandKind) -> Brand {
        Brand {
            id: Some(ObjectId::new()),
            workspace_id: ObjectId::new(),
            name: name.to_string(),
            kind,
        }
    }

    #[test]
    fn prompt_lists_every_brand_and_its_role() {
        let brands = vec![brand("Acme", BrandKind::Own), brand("Beta", BrandKind::Competitor)];
        let prompt = build_prompt("some answer", &brands);
        assert!(prompt.contains("Acme"));
        assert!(prompt.contains("Beta"));
        assert!(prompt.contains("(own)"));
        assert!(prompt.contains("(competitor)"));
    }

    #[test]
    fn parses_well_formed_reply_with_positions() {
        let brands = vec![brand("Acme", BrandKind::Own), brand("Beta", BrandKind::Competitor)];
        let reply = r#"Sure: {"brands": [
            {"brandKeywords": "Acme", "mentioned": true, "sentiment": "positive", "position": 1},
            {"brandKeywords": "Beta", "mentioned": true, "sentiment": "negative", "position": 2}
        ], "overallSentiment": "neutral"}"#;
        let (brand_sentiments, overall) = parse_reply(reply, &brands);
        assert_eq!(overall, SentimentVerdict::Neutral);
        assert_eq!(brand_sentiments.len(), 2);
        assert!(brand_sentiments[0].mentioned);
        assert_eq!(brand_sentiments[0].sentiment, SentimentVerdict::Positive);
        assert_eq!(brand_sentiments[0].position, Some(1));
        assert_eq!(brand_sentiments[1].sentiment, SentimentVerdict::Negative);
        assert_eq!(brand_sentiments[1].position, Some(2));
    }

    #[test]
    fn positions_are_assigned_by_first_appearance_not_by_the_models_own_claim() {
        let brands = vec![brand("Acme", BrandKind::Own), brand("Beta", BrandKind::Competitor)];
        // Model lists Acme first but (wrongly) claims Beta is position 1 and
        // Acme is position 2. The parser must ignore that and assign by
        // order of appearance in the reply instead.
        let reply = r#"{"brands": [
            {"brandKeywords": "Acme", "mentioned": true, "sentiment": "positive", "position": 2},
            {"brandKeywords": "Beta", "mentioned": true, "sentiment": "negative", "position": 1}
        ], "overallSentiment": "neutral"}"#;
        let (brand_sentiments, _) = parse_reply(reply, &brands);
        let acme = brand_sentiments.iter().find(|b| b.brand_keywords == "Acme").unwrap();
        let beta = brand_sentiments.iter().find(|b| b.brand_keywords == "Beta").unwrap();
        assert_eq!(acme.position, Some(1));
        assert_eq!(beta.position, Some(2));
    }

    #[test]
    fn brand_omitted_from_reply_defaults_to_not_mentioned() {
        let brands = vec![brand("Acme", BrandKind::Own), brand("Beta", BrandKind::Competitor)];
        let reply = r#"{"brands": [
            {"brandKeywords": "Acme", "mentioned": true, "sentiment": "positive", "position": 1}
        ], "overallSentiment": "positive"}"#;
        let (brand_sentiments, _) = parse_reply(reply, &brands);
        let beta = brand_sentiments.iter().find(|b| b.brand_keywords == "Beta").unwrap();
        assert!(!beta.mentioned);
        assert_eq!(beta.sentiment, SentimentVerdict::NotDetermined);
        assert_eq!(beta.position, None);
    }

    #[test]
    fn reply_with_no_json_falls_back_to_not_determined_for_every_brand() {
        let brands = vec![brand("Acme", BrandKind::Own), brand("Beta", BrandKind::Competitor)];
        let (brand_sentiments, overall) = parse_reply("I'm not able to answer that request.", &brands);
        assert_eq!(overall, SentimentVerdict::NotDetermined);
        assert!(brand_sentiments.iter().all(|b| !b.mentioned));
        assert!(brand_sentiments
            .iter()
            .all(|b| b.sentiment == SentimentVerdict::NotDetermined));
    }

    #[test]
    fn reply_wrapped_in_code_fence_still_parses() {
        let brands = vec![brand("Acme", BrandKind::Own)];
        let reply = "```json\n{\"brands\": [{\"brandKeywords\": \"Acme\", \"mentioned\": true, \"sentiment\": \"positive\", \"position\": 1}], \"overallSentiment\": \"positive\"}\n```";
        let (brand_sentiments, overall) = parse_reply(reply, &brands);
        assert_eq!(overall, SentimentVerdict::Positive);
        assert_eq!(brand_sentiments[0].sentiment, SentimentVerdict::Positive);
    }
}

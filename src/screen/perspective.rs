// Google Perspective API screening backend.
//
// Useful where the ONNX model can't be hosted. The free tier allows about one
// request per second, so every call goes through the shared rate limiter.
// Requests set doNotStore: post drafts under review are not public yet.
//
// API docs: https://developers.perspectiveapi.com/s/about-the-api-methods

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::rate_limiter::RateLimiter;
use super::traits::{ContentScorer, ScoreCategories, ScreenScore};
use crate::output::truncate_chars;

const ANALYZE_URL: &str = "https://commentanalyzer.googleapis.com/v1alpha1/comments:analyze";

/// Attributes requested on every call.
const ATTRIBUTES: [&str; 6] = [
    "TOXICITY",
    "SEVERE_TOXICITY",
    "PROFANITY",
    "IDENTITY_ATTACK",
    "INSULT",
    "THREAT",
];

pub struct PerspectiveScorer {
    client: Client,
    api_key: String,
    limiter: RateLimiter,
}

impl PerspectiveScorer {
    pub fn new(api_key: String, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build Perspective HTTP client")?;
        Ok(Self {
            client,
            api_key,
            limiter: RateLimiter::per_second(1.0),
        })
    }
}

#[async_trait]
impl ContentScorer for PerspectiveScorer {
    async fn score_text(&self, text: &str) -> Result<ScreenScore> {
        self.limiter.acquire().await;

        let request = AnalyzeRequest {
            comment: Comment { text },
            requested_attributes: ATTRIBUTES
                .iter()
                .map(|name| (*name, Empty {}))
                .collect(),
            languages: ["en"],
            do_not_store: true,
        };

        let response = self
            .client
            .post(ANALYZE_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .context("Perspective API request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Perspective API returned {status}: {body}");
        }

        let parsed: AnalyzeResponse = response
            .json()
            .await
            .context("Failed to parse Perspective API response")?;

        let score = to_screen_score(&parsed);
        debug!(
            toxicity = score.toxicity,
            peak = score.peak(),
            text_preview = %truncate_chars(text, 50),
            "Perspective scored text"
        );
        Ok(score)
    }
}

fn to_screen_score(response: &AnalyzeResponse) -> ScreenScore {
    let get = |name: &str| {
        response
            .attribute_scores
            .get(name)
            .map(|a| a.summary_score.value)
    };
    ScreenScore {
        toxicity: get("TOXICITY").unwrap_or(0.0),
        categories: ScoreCategories {
            severe_toxicity: get("SEVERE_TOXICITY"),
            obscene: get("PROFANITY"),
            identity_attack: get("IDENTITY_ATTACK"),
            insult: get("INSULT"),
            threat: get("THREAT"),
            sexual_explicit: None,
        },
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    comment: Comment<'a>,
    requested_attributes: HashMap<&'static str, Empty>,
    languages: [&'static str; 1],
    do_not_store: bool,
}

#[derive(Serialize)]
struct Comment<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Empty {}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    #[serde(default)]
    attribute_scores: HashMap<String, AttributeScore>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttributeScore {
    summary_score: SummaryScore,
}

#[derive(Deserialize)]
struct SummaryScore {
    value: f64,
}

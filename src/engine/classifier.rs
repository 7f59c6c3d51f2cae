//! External content-safety classifier client.
//!
//! The engine never sees the classifier's model internals; it only needs a
//! score in [0, 1] per configured category. The trait keeps the evaluator
//! testable without a live endpoint.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;

/// Source of per-category scores for one input.
#[async_trait::async_trait]
pub trait ContentClassifier: Send + Sync {
    /// Score `text` against the given categories. Implementations must
    /// return a score for every requested category or an error.
    async fn score(
        &self,
        text: &str,
        categories: &[String],
    ) -> Result<HashMap<String, f64>, String>;
}

/// Request to the classifier endpoint.
#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    text: &'a str,
    categories: &'a [String],
}

/// Response from the classifier endpoint.
#[derive(Debug, Deserialize)]
struct ScoreResponse {
    scores: HashMap<String, f64>,
}

/// HTTP classifier with a bounded per-request timeout.
pub struct HttpClassifier {
    config: ClassifierConfig,
    client: Client,
}

impl HttpClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }
}

#[async_trait::async_trait]
impl ContentClassifier for HttpClassifier {
    async fn score(
        &self,
        text: &str,
        categories: &[String],
    ) -> Result<HashMap<String, f64>, String> {
        if !self.config.enabled {
            // Disabled guard scores every category clean
            tracing::debug!("Classifier disabled, scoring all categories 0.0");
            return Ok(categories.iter().map(|c| (c.clone(), 0.0)).collect());
        }

        let request = ScoreRequest { text, categories };

        let mut builder = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json");
        if !self.config.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Classifier error {}: {}", status, body));
        }

        let score_response: ScoreResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse response: {}", e))?;

        validate_scores(score_response, categories)
    }
}

/// Check the response covers every requested category with an in-range
/// score. A partial or out-of-range response counts as a failed call.
fn validate_scores(
    response: ScoreResponse,
    categories: &[String],
) -> Result<HashMap<String, f64>, String> {
    for category in categories {
        match response.scores.get(category) {
            None => return Err(format!("Response missing category '{}'", category)),
            Some(score) if !(0.0..=1.0).contains(score) => {
                return Err(format!(
                    "Score {} for category '{}' is outside [0, 1]",
                    score, category
                ));
            }
            Some(_) => {}
        }
    }
    Ok(response.scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_validate_complete_response() {
        let response = ScoreResponse {
            scores: HashMap::from([("violence".to_string(), 0.2), ("hate".to_string(), 0.9)]),
        };
        let scores = validate_scores(response, &categories(&["violence", "hate"])).unwrap();
        assert_eq!(scores["hate"], 0.9);
    }

    #[test]
    fn test_validate_rejects_missing_category() {
        let response = ScoreResponse {
            scores: HashMap::from([("violence".to_string(), 0.2)]),
        };
        let err = validate_scores(response, &categories(&["violence", "hate"])).unwrap_err();
        assert!(err.contains("hate"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_score() {
        let response = ScoreResponse {
            scores: HashMap::from([("violence".to_string(), 1.4)]),
        };
        assert!(validate_scores(response, &categories(&["violence"])).is_err());
    }

    #[tokio::test]
    async fn test_disabled_classifier_scores_clean() {
        let classifier = HttpClassifier::new(ClassifierConfig::default());
        let scores = classifier
            .score("anything at all", &categories(&["violence", "hate"]))
            .await
            .unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores.values().all(|s| *s == 0.0));
    }
}

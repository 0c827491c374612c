//! HTTP client for the intent classifier inference service

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::debug;

use super::IntentClassifier;
use crate::config::ClassifierConfig;
use crate::types::Prediction;

#[derive(Debug, Deserialize)]
struct RawPrediction {
    intent: String,
    #[serde(deserialize_with = "deserialize_probability")]
    probability: f64,
}

/// The inference service may send the probability as a number or a numeric string
fn deserialize_probability<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("probability out of range")),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid probability '{}': {}", s, e))),
        other => Err(serde::de::Error::custom(format!(
            "unexpected probability value: {}",
            other
        ))),
    }
}

/// Keep entries strictly above `threshold`, highest probability first
pub fn qualifying(mut predictions: Vec<Prediction>, threshold: f64) -> Vec<Prediction> {
    predictions.retain(|p| p.probability > threshold && p.probability.is_finite());
    predictions.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    predictions
}

pub struct HttpClassifier {
    client: Client,
    endpoint: String,
    threshold: f64,
}

impl HttpClassifier {
    pub fn new(config: &ClassifierConfig, threshold: f64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build classifier HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            threshold,
        })
    }
}

#[async_trait]
impl IntentClassifier for HttpClassifier {
    async fn predict(&self, text: &str) -> Result<Vec<Prediction>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .context("Failed to reach classifier service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Classifier error ({}): {}", status, body);
        }

        let raw: Vec<RawPrediction> = response
            .json()
            .await
            .context("Failed to parse classifier response")?;

        let predictions = raw
            .into_iter()
            .map(|r| Prediction::new(r.intent, r.probability))
            .collect();
        let predictions = qualifying(predictions, self.threshold);

        debug!(count = predictions.len(), "Classifier predictions");
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probability_as_string_or_number() {
        let raw: Vec<RawPrediction> = serde_json::from_str(
            r#"[{"intent":"greeting","probability":"0.98"},{"intent":"thanks","probability":0.5}]"#,
        )
        .unwrap();
        assert_eq!(raw[0].probability, 0.98);
        assert_eq!(raw[1].probability, 0.5);

        let bad: Result<Vec<RawPrediction>, _> =
            serde_json::from_str(r#"[{"intent":"x","probability":"high"}]"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_qualifying_filters_and_sorts() {
        let predictions = vec![
            Prediction::new("low", 0.40),
            Prediction::new("edge", 0.95),
            Prediction::new("second", 0.96),
            Prediction::new("top", 0.99),
        ];
        let kept = qualifying(predictions, 0.95);
        let tags: Vec<_> = kept.iter().map(|p| p.intent.as_str()).collect();
        assert_eq!(tags, vec!["top", "second"]);
    }
}

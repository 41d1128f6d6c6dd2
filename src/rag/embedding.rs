use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::config::settings::{require, EmbeddingSettings};
use crate::core::errors::ConciergeError;

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ConciergeError>;
}

/// Hugging Face inference router, `feature-extraction` pipeline.
pub struct HuggingFaceEmbedder {
    client: reqwest::Client,
    settings: EmbeddingSettings,
}

impl HuggingFaceEmbedder {
    pub fn new(settings: EmbeddingSettings) -> Result<Self, ConciergeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(ConciergeError::internal)?;
        Ok(Self { client, settings })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}/pipeline/feature-extraction",
            self.settings.base_url.trim_end_matches('/'),
            model
        )
    }
}

#[async_trait]
impl Embedder for HuggingFaceEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ConciergeError> {
        let token = require(&self.settings.api_token, "HUGGINGFACEHUB_API_TOKEN")?;
        let model = self.settings.model.trim();
        if model.is_empty() {
            return Err(ConciergeError::missing_setting("HUGGINGFACE_EMBEDDING_MODEL"));
        }
        if text.trim().is_empty() {
            return Err(ConciergeError::validation("text to embed must not be empty"));
        }

        let body = json!({
            "inputs": [text],
            "options": { "wait_for_model": true },
        });

        let started = std::time::Instant::now();
        let res = self
            .client
            .post(self.endpoint(model))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ConciergeError::Upstream(format!("embedding request failed: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ConciergeError::Upstream(format!(
                "embedding endpoint returned {}: {}",
                status,
                truncate(&text, 300)
            )));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| ConciergeError::Upstream(format!("embedding response is not JSON: {}", e)))?;
        let vector = parse_embedding(&payload)?;

        tracing::debug!(
            model,
            dimensions = vector.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "embedded query"
        );
        Ok(vector)
    }
}

/// Accepts `[f, ...]`, `[[f, ...]]` (any nesting depth) and `[{"embedding": [...]}]`.
pub fn parse_embedding(payload: &Value) -> Result<Vec<f32>, ConciergeError> {
    let items = payload
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| unexpected_shape("expected a non-empty list", payload))?;

    let mut vector = match &items[0] {
        Value::Object(map) => map
            .get("embedding")
            .ok_or_else(|| unexpected_shape("object without an `embedding` field", payload))?,
        Value::Number(_) => payload,
        other => other,
    };

    while let Some(inner) = vector
        .as_array()
        .and_then(|values| values.first())
        .filter(|first| first.is_array())
    {
        vector = inner;
    }

    let values = vector
        .as_array()
        .filter(|values| !values.is_empty())
        .ok_or_else(|| unexpected_shape("embedding is not a list of floats", payload))?;

    values
        .iter()
        .map(|value| {
            value
                .as_f64()
                .map(|number| number as f32)
                .ok_or_else(|| unexpected_shape("embedding contains a non-numeric value", payload))
        })
        .collect()
}

fn unexpected_shape(reason: &str, payload: &Value) -> ConciergeError {
    ConciergeError::Upstream(format!(
        "unexpected embedding response ({}): {}",
        reason,
        truncate(&payload.to_string(), 200)
    ))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

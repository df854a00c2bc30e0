use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    error::{Error, Result},
    provider::{OpenAiClient, ProviderError},
};

/// Turns query text into a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Fails with [`Error::EmbeddingUnavailable`] once transport retries
    /// are exhausted.
    async fn embed(&self, text: &str, timeout: Duration) -> Result<Vec<f32>>;
}

/// Embeddings through an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Arc<OpenAiClient>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(client: Arc<OpenAiClient>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str, timeout: Duration) -> Result<Vec<f32>> {
        let body = json!({
            "model": self.model,
            "input": text,
        });
        let response = self
            .client
            .post_json("embeddings", &body, timeout)
            .await
            .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;

        parse_embedding(&response)
            .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))
    }
}

/// Extract `data[0].embedding` from an embeddings response.
fn parse_embedding(response: &Value) -> std::result::Result<Vec<f32>, ProviderError> {
    let values = response
        .get("data")
        .and_then(|d| d.get(0))
        .and_then(|d| d.get("embedding"))
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::ResponseParse {
            message: "missing data[0].embedding".to_string(),
        })?;

    let vector: Vec<f32> = values
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<_>>()
        .ok_or_else(|| ProviderError::ResponseParse {
            message: "embedding contains non-numeric values".to_string(),
        })?;

    if vector.is_empty() {
        return Err(ProviderError::ResponseParse {
            message: "embedding is empty".to_string(),
        });
    }
    Ok(vector)
}

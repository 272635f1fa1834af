//! Text embedding interface.
//!
//! The embedding model is an external collaborator: the gateway only needs
//! `embed(text) -> unit vector`. [`HttpEmbedder`] talks to an
//! OpenAI-compatible `/v1/embeddings` endpoint; the semantic cache works
//! against the [`Embedder`] trait and never sees the transport.

use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Opaque embedding service: text in, unit-norm vector of fixed dimension out.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimensionality of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Embed one text. The returned vector has `dimension()` components and
    /// L2-norm 1 (up to float rounding).
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Scale a vector to unit L2-norm. Zero vectors are returned unchanged.
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for component in &mut vector {
            *component /= norm;
        }
    }
    vector
}

/// Embedder backed by an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl HttpEmbedder {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            dimension,
            api_key: None,
        }
    }

    /// Send `Authorization: Bearer {key}` with each request.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = json!({"model": self.model, "input": text});

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Other(format!(
                "embedding request failed with HTTP {}: {}",
                status, body
            )));
        }

        let payload: Value = response.json().await?;
        let raw = payload["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| {
                GatewayError::Other("embedding response missing data[0].embedding".to_string())
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect::<Vec<f32>>();

        if raw.len() != self.dimension {
            return Err(GatewayError::Other(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                raw.len()
            )));
        }
        Ok(normalize(raw))
    }
}

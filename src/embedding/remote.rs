//! Embedding provider over an OpenAI-compatible `/embeddings` endpoint.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use super::{l2_normalize, EmbeddingProvider, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;

pub struct RemoteProvider {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl RemoteProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: format!("{}/embeddings", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }

    fn request(&self, input: serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "model": self.model, "input": input }))
            .send()
            .with_context(|| format!("embedding request to {} failed", self.url))?;

        anyhow::ensure!(
            response.status().is_success(),
            "embedding endpoint returned HTTP {}",
            response.status()
        );

        let body: EmbeddingsResponse = response
            .json()
            .context("failed to decode embedding response")?;

        body.data
            .into_iter()
            .map(|item| {
                let mut v = item.embedding;
                anyhow::ensure!(
                    v.len() == EMBEDDING_DIM,
                    "embedding dimension mismatch: expected {EMBEDDING_DIM}, got {} \
                     (wrong model configured?)",
                    v.len()
                );
                l2_normalize(&mut v);
                Ok(v)
            })
            .collect()
    }
}

impl EmbeddingProvider for RemoteProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(serde_json::json!(text))?;
        vectors
            .pop()
            .context("embedding endpoint returned no vectors")
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.request(serde_json::json!(texts))?;
        anyhow::ensure!(
            vectors.len() == texts.len(),
            "embedding endpoint returned {} vectors for {} inputs",
            vectors.len(),
            texts.len()
        );
        Ok(vectors)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

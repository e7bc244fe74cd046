//! Thin HTTP `EmbeddingProvider`: posts the canonicalized prompt to a
//! configured embeddings endpoint and reads back the first vector.
//! Deliberately does not own retry or timeout policy -- that wrapping
//! happens once, in `gateway_core::cache::embed_with_retry`, so this
//! client stays a plain request/response shim.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use gateway_core::cache::{CacheError, EmbeddingProvider};
use gateway_core::models::EmbeddingVector;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponseEntry {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingResponseEntry>,
}

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl HttpEmbeddingProvider {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, CacheError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|err| CacheError::Embedding(err.to_string()))?;

        if !response.status().is_success() {
            return Err(CacheError::Embedding(format!(
                "embedding endpoint returned {}",
                response.status()
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| CacheError::Embedding(err.to_string()))?;

        body.data
            .into_iter()
            .next()
            .map(|entry| EmbeddingVector(entry.embedding))
            .ok_or_else(|| CacheError::Embedding("empty embedding response".to_string()))
    }
}

//! Embedding providers.
//!
//! Two interchangeable backends share the [`EmbeddingProvider`] trait:
//! [`OpenAiEmbedder`] calls an OpenAI-compatible `/embeddings` endpoint in
//! batches, [`HashedNgramEmbedder`] runs locally at no cost. Which one is used
//! is a configuration choice ([`EmbeddingProviderKind`]).

use crate::config::{parse_base_url, EmbeddingConfig, EmbeddingProviderKind};
use crate::error::PipelineError;
use crate::retry::{is_transient_status, Backoff};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::embedding("provider returned no vector for the query"))
    }
}

pub fn embedding_provider(
    config: &EmbeddingConfig,
    api_key: Option<&str>,
) -> Result<Arc<dyn EmbeddingProvider>, PipelineError> {
    match config.provider {
        EmbeddingProviderKind::Local => Ok(Arc::new(HashedNgramEmbedder::new(config.dimensions))),
        EmbeddingProviderKind::OpenAi => {
            let api_key = api_key.filter(|key| !key.trim().is_empty()).ok_or_else(|| {
                PipelineError::Configuration(
                    "OPENAI_API_KEY is required for the openai embedding provider".to_string(),
                )
            })?;
            Ok(Arc::new(OpenAiEmbedder::new(config, api_key)?))
        }
    }
}

/// Feature-hashing embedder over word unigrams and character trigrams.
#[derive(Debug, Clone, Copy)]
pub struct HashedNgramEmbedder {
    dimensions: usize,
}

impl HashedNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();

        for word in lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            vector[self.bucket(word.as_bytes())] += 1.0;

            let chars: Vec<char> = format!(" {word} ").chars().collect();
            for window in chars.windows(3) {
                let gram: String = window.iter().collect();
                vector[self.bucket(gram.as_bytes())] += 0.5;
            }
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }
        vector
    }

    fn bucket(&self, bytes: &[u8]) -> usize {
        let mut hash = 0xcbf2_9ce4_8422_2325u64;
        for byte in bytes {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (hash % self.dimensions as u64) as usize
    }
}

#[async_trait]
impl EmbeddingProvider for HashedNgramEmbedder {
    fn model_name(&self) -> &str {
        "hashed-ngram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
    backoff: Backoff,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self, PipelineError> {
        let base = parse_base_url(&config.base_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| PipelineError::Configuration(format!("http client: {error}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base.as_str().trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
            backoff: Backoff::new(config.max_retries),
        })
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    async fn request_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": batch,
            }))
            .send()
            .await
            .map_err(|error| PipelineError::Embedding {
                details: format!("request to {} failed: {error}", self.endpoint),
                transient: true,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Embedding {
                details: format!("{} returned {status}: {body}", self.endpoint),
                transient: is_transient_status(status),
            });
        }

        let mut payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| PipelineError::embedding(format!("malformed response: {error}")))?;

        payload
            .data
            .sort_by_key(|item| item.index.unwrap_or(usize::MAX));
        let vectors: Vec<Vec<f32>> = payload.data.into_iter().map(|item| item.embedding).collect();

        if vectors.len() != batch.len() {
            return Err(PipelineError::embedding(format!(
                "expected {} vectors, got {}",
                batch.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != self.dimensions) {
            return Err(PipelineError::embedding(format!(
                "dimension mismatch: expected {}, got {}",
                self.dimensions,
                bad.len()
            )));
        }

        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(batch = batch_no, size = batch.len(), model = %self.model, "embedding batch");
            let embedded = self
                .backoff
                .run("embeddings", || self.request_batch(batch))
                .await?;
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}

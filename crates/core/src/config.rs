use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extraction: ExtractionConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub chat: ChatConfig,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.chunking.validate()?;

        if self.retrieval.top_k == 0 {
            return Err(PipelineError::Configuration(
                "retrieval.top_k must be at least 1".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(PipelineError::Configuration(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(PipelineError::Configuration(
                "embedding.dimensions must be at least 1".to_string(),
            ));
        }

        parse_base_url(&self.embedding.base_url)?;
        parse_base_url(&self.chat.base_url)?;
        Ok(())
    }
}

pub(crate) fn parse_base_url(raw: &str) -> Result<Url, PipelineError> {
    Url::parse(raw)
        .map_err(|error| PipelineError::Configuration(format!("invalid base url {raw}: {error}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Inserted between consecutive pages and documents. Empty keeps pages glued together.
    pub page_separator: String,
    /// Report unreadable PDFs instead of aborting the whole batch.
    pub skip_unreadable: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            page_separator: String::new(),
            skip_unreadable: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separator: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            separator: "\n".to_string(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.chunk_size == 0 {
            return Err(PipelineError::Chunking("chunk_size must be positive".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(PipelineError::Chunking(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::OpenAi,
            model: "text-embedding-ada-002".to_string(),
            dimensions: 1_536,
            batch_size: 1_000,
            max_retries: 3,
            timeout_secs: 60,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        }
    }
}

impl EmbeddingConfig {
    pub fn local() -> Self {
        Self {
            provider: EmbeddingProviderKind::Local,
            model: "hashed-ngram".to_string(),
            dimensions: 384,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub metric: DistanceMetric,
    /// Rewrite follow-up questions into standalone ones before retrieval.
    pub condense_question: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            metric: DistanceMetric::Cosine,
            condense_question: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub model: String,
    pub temperature: f32,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub base_url: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            max_retries: 3,
            timeout_secs: 120,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_splitter_and_retriever_settings() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunking.chunk_size, 1_000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.chunking.separator, "\n");
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.extraction.page_separator, "");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let mut config = PipelineConfig::default();
        config.chunking.chunk_overlap = 1_000;
        assert!(matches!(config.validate(), Err(PipelineError::Chunking(_))));
    }

    #[test]
    fn bad_base_url_is_a_configuration_error() {
        let mut config = PipelineConfig::default();
        config.chat.base_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() -> Result<(), serde_json::Error> {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"embedding": {"provider": "local"}, "retrieval": {"top_k": 2}}"#,
        )?;
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Local);
        assert_eq!(config.retrieval.top_k, 2);
        assert_eq!(config.chunking.chunk_size, 1_000);

        let config: PipelineConfig =
            serde_json::from_str(r#"{"embedding": {"provider": "openai", "dimensions": 8}}"#)?;
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::OpenAi);
        assert_eq!(config.embedding.dimensions, 8);
        assert_eq!(
            serde_json::to_value(EmbeddingProviderKind::OpenAi)?,
            serde_json::json!("openai")
        );
        Ok(())
    }
}

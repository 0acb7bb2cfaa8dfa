use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pdf extraction failed: {0}")]
    Extraction(String),

    #[error("invalid chunking config: {0}")]
    Chunking(String),

    #[error("embedding failed: {details}")]
    Embedding { details: String, transient: bool },

    #[error("generation failed: {details}")]
    Generation { details: String, transient: bool },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("question is empty")]
    EmptyQuestion,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn embedding(details: impl Into<String>) -> Self {
        Self::Embedding {
            details: details.into(),
            transient: false,
        }
    }

    pub fn generation(details: impl Into<String>) -> Self {
        Self::Generation {
            details: details.into(),
            transient: false,
        }
    }

    /// Only provider round trips can be retried; everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Embedding { transient, .. } | Self::Generation { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Short label shown next to the message in the UI.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Extraction(_) => "extraction",
            Self::Chunking(_) => "chunking",
            Self::Embedding { .. } => "embedding",
            Self::Generation { .. } => "generation",
            Self::Configuration(_) => "configuration",
            Self::EmptyQuestion => "input",
            Self::Io(_) => "io",
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod presentation;
pub mod retry;
pub mod session;

pub use chunking::split_text;
pub use config::{
    ChatConfig, ChunkingConfig, DistanceMetric, EmbeddingConfig, EmbeddingProviderKind,
    ExtractionConfig, PipelineConfig, RetrievalConfig,
};
pub use embeddings::{embedding_provider, EmbeddingProvider, HashedNgramEmbedder, OpenAiEmbedder};
pub use error::PipelineError;
pub use extractor::{extract_text, ExtractedText, LopdfExtractor, PageText, PdfExtractor};
pub use index::{build_index, cosine_similarity, FlatIndex, VectorIndex};
pub use ingest::{discover_pdf_files, load_documents};
pub use llm::{chat_model, ChatModel, OpenAiChat, PromptMessage, PromptRole};
pub use models::{
    ChatHistory, ChatRole, ChatTurn, DocumentSummary, ProcessingSummary, RawDocument, ScoredChunk,
    SessionState, SkippedDocument,
};
pub use presentation::{render_history, render_history_plain, Speaker, UPLOAD_FIRST_NOTICE};
pub use retry::Backoff;
pub use session::{build_prompt, Pipeline, ProcessOutcome, Session, PLACEHOLDER_INSTRUCTIONS};

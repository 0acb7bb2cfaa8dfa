//! Conversation sessions and the processing pipeline behind them.
//!
//! A [`Pipeline`] bundles configuration with the external providers (PDF
//! extraction, embeddings, chat completion). A [`Session`] owns one vector
//! index and one chat history and runs every question through explicit
//! stages: retrieve, build prompt, generate, record.

use crate::chunking::split_text;
use crate::config::PipelineConfig;
use crate::embeddings::{embedding_provider, EmbeddingProvider};
use crate::error::PipelineError;
use crate::extractor::{extract_text, LopdfExtractor, PdfExtractor};
use crate::index::{build_index, FlatIndex, VectorIndex};
use crate::llm::{chat_model, ChatModel, PromptMessage, PromptRole};
use crate::models::{
    ChatHistory, ChatRole, ProcessingSummary, RawDocument, ScoredChunk, SessionState,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

/// Indexed into every fresh session so questions asked before any upload get a hint.
pub const PLACEHOLDER_INSTRUCTIONS: &str = "Remind user to upload PDF documents on the left hand side of the page. After which, the user can ask questions about the document.";

const ANSWER_INSTRUCTIONS: &str = "Use the following pieces of context to answer the question at the end. If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n";

const CONDENSE_INSTRUCTIONS: &str = "Given the following conversation and a follow up question, rephrase the follow up question to be a standalone question, in its original language.";

pub struct Pipeline {
    config: PipelineConfig,
    extractor: Arc<dyn PdfExtractor>,
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatModel>,
    placeholder: OnceCell<Arc<dyn VectorIndex>>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        extractor: Arc<dyn PdfExtractor>,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            extractor,
            embedder,
            chat,
            placeholder: OnceCell::new(),
        })
    }

    /// Wires the lopdf extractor and the configured remote/local providers.
    pub fn from_config(config: PipelineConfig, api_key: Option<&str>) -> Result<Self, PipelineError> {
        let embedder = embedding_provider(&config.embedding, api_key)?;
        let chat = chat_model(&config.chat, api_key)?;
        Self::new(config, Arc::new(LopdfExtractor), embedder, chat)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn chat_model(&self) -> &dyn ChatModel {
        self.chat.as_ref()
    }

    /// Chunks `text` and embeds the chunks into a fresh index.
    pub async fn index_text(&self, text: &str) -> Result<FlatIndex, PipelineError> {
        let chunks = split_text(text, &self.config.chunking)?;
        build_index(chunks, self.embedder.as_ref(), self.config.retrieval.metric).await
    }

    /// Index over [`PLACEHOLDER_INSTRUCTIONS`]. Embedded on first use, then
    /// shared by every session started from this pipeline.
    pub async fn placeholder_index(&self) -> Result<Arc<dyn VectorIndex>, PipelineError> {
        self.placeholder
            .get_or_try_init(|| async {
                let index = self.index_text(PLACEHOLDER_INSTRUCTIONS).await?;
                info!(chunks = index.len(), "placeholder index built");
                Ok::<_, PipelineError>(Arc::new(index) as Arc<dyn VectorIndex>)
            })
            .await
            .cloned()
    }

    /// Extract, chunk and embed a batch of uploads.
    pub async fn process(
        &self,
        documents: &[RawDocument],
    ) -> Result<(FlatIndex, ProcessingSummary), PipelineError> {
        let extracted = extract_text(self.extractor.as_ref(), documents, &self.config.extraction)?;
        let chunks = split_text(&extracted.text, &self.config.chunking)?;
        info!(
            documents = extracted.documents.len(),
            skipped = extracted.skipped.len(),
            characters = extracted.text.chars().count(),
            chunks = chunks.len(),
            "documents extracted and chunked"
        );

        let chunk_count = chunks.len();
        let index = build_index(chunks, self.embedder.as_ref(), self.config.retrieval.metric).await?;

        let summary = ProcessingSummary {
            characters: extracted.text.chars().count(),
            documents: extracted.documents,
            skipped: extracted.skipped,
            chunks: chunk_count,
            indexed_at: Utc::now(),
        };
        Ok((index, summary))
    }
}

#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// The Process action was confirmed with zero files; nothing changed.
    NothingUploaded,
    Indexed(ProcessingSummary),
}

pub struct Session {
    id: Uuid,
    state: SessionState,
    index: Arc<dyn VectorIndex>,
    history: ChatHistory,
    summary: Option<ProcessingSummary>,
}

impl Session {
    /// Creates a session whose index only holds [`PLACEHOLDER_INSTRUCTIONS`].
    pub async fn start(pipeline: &Pipeline) -> Result<Self, PipelineError> {
        let session = Self {
            id: Uuid::new_v4(),
            state: SessionState::Uninitialized,
            index: pipeline.placeholder_index().await?,
            history: ChatHistory::new(),
            summary: None,
        };
        info!(session = %session.id, "session started with placeholder index");
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn summary(&self) -> Option<&ProcessingSummary> {
        self.summary.as_ref()
    }

    pub fn indexed_chunks(&self) -> usize {
        self.index.len()
    }

    /// Rebuilds the index from `documents` and resets the history.
    ///
    /// The new index is only swapped in after the whole pipeline succeeded;
    /// on error the session keeps its previous index and history.
    pub async fn process_documents(
        &mut self,
        pipeline: &Pipeline,
        documents: &[RawDocument],
    ) -> Result<ProcessOutcome, PipelineError> {
        if documents.is_empty() {
            return Ok(ProcessOutcome::NothingUploaded);
        }

        let (index, summary) = pipeline.process(documents).await?;

        self.index = Arc::new(index);
        self.history = ChatHistory::new();
        self.state = SessionState::Ready;
        self.summary = Some(summary.clone());
        info!(
            session = %self.id,
            chunks = summary.chunks,
            documents = summary.documents.len(),
            "session index replaced"
        );
        Ok(ProcessOutcome::Indexed(summary))
    }

    /// Answers `question` and records the exchange.
    ///
    /// The history is only touched once an answer came back, so a failed
    /// question leaves it exactly as it was.
    pub async fn ask(
        &mut self,
        pipeline: &Pipeline,
        question: &str,
    ) -> Result<&ChatHistory, PipelineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::EmptyQuestion);
        }

        let search_text = self.search_text(pipeline, question).await?;
        let context = self.retrieve(pipeline, &search_text).await?;
        let prompt = build_prompt(&self.history, &context, question);
        let answer = pipeline.chat.complete(&prompt).await?;

        self.history.record_exchange(question, answer);
        info!(
            session = %self.id,
            exchanges = self.history.exchanges(),
            context_chunks = context.len(),
            "question answered"
        );
        Ok(&self.history)
    }

    /// Top-k chunks for `text` from the active index.
    pub async fn retrieve(
        &self,
        pipeline: &Pipeline,
        text: &str,
    ) -> Result<Vec<ScoredChunk>, PipelineError> {
        let query_vector = pipeline.embedder.embed_query(text).await?;
        self.index
            .search(&query_vector, pipeline.config.retrieval.top_k)
    }

    async fn search_text(&self, pipeline: &Pipeline, question: &str) -> Result<String, PipelineError> {
        if !pipeline.config.retrieval.condense_question || self.history.is_empty() {
            return Ok(question.to_string());
        }
        let prompt = build_condense_prompt(&self.history, question);
        pipeline.chat.complete(&prompt).await
    }
}

/// System context, then the prior conversation, then the new question.
pub fn build_prompt(
    history: &ChatHistory,
    context: &[ScoredChunk],
    question: &str,
) -> Vec<PromptMessage> {
    let context_text = context
        .iter()
        .map(|chunk| chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(PromptMessage::new(
        PromptRole::System,
        format!("{ANSWER_INSTRUCTIONS}{context_text}"),
    ));
    messages.extend(
        history
            .turns()
            .iter()
            .map(|turn| PromptMessage::new(turn.role.into(), turn.content.clone())),
    );
    messages.push(PromptMessage::new(PromptRole::User, question));
    messages
}

pub fn build_condense_prompt(history: &ChatHistory, question: &str) -> Vec<PromptMessage> {
    let transcript = history
        .turns()
        .iter()
        .map(|turn| match turn.role {
            ChatRole::User => format!("Human: {}", turn.content),
            ChatRole::Assistant => format!("Assistant: {}", turn.content),
        })
        .collect::<Vec<_>>()
        .join("\n");

    vec![PromptMessage::new(
        PromptRole::User,
        format!(
            "{CONDENSE_INSTRUCTIONS}\n\nChat History:\n{transcript}\nFollow Up Input: {question}\nStandalone question:"
        ),
    )]
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::embeddings::HashedNgramEmbedder;
    use crate::extractor::tests::pdf_with_pages;
    use crate::extractor::PageText;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Treats the upload bytes as the already-extracted text of a single page.
    pub(crate) struct PlainTextExtractor;

    impl PdfExtractor for PlainTextExtractor {
        fn extract_pages(&self, document: &RawDocument) -> Result<Vec<PageText>, PipelineError> {
            let text = String::from_utf8(document.bytes.clone())
                .map_err(|error| PipelineError::Extraction(error.to_string()))?;
            Ok(vec![PageText { number: 1, text }])
        }
    }

    pub(crate) struct FlakyEmbedder {
        inner: HashedNgramEmbedder,
        pub(crate) fail: AtomicBool,
        pub(crate) batches: AtomicUsize,
    }

    impl FlakyEmbedder {
        pub(crate) fn new() -> Self {
            Self {
                inner: HashedNgramEmbedder::new(64),
                fail: AtomicBool::new(false),
                batches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        fn model_name(&self) -> &str {
            "flaky"
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(PipelineError::embedding("provider unreachable"));
            }
            self.inner.embed_batch(texts).await
        }
    }

    /// Records every prompt and answers with a numbered reply.
    #[derive(Default)]
    pub(crate) struct ScriptedChat {
        pub(crate) prompts: Mutex<Vec<Vec<PromptMessage>>>,
        pub(crate) fail: AtomicBool,
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        fn model_id(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, messages: &[PromptMessage]) -> Result<String, PipelineError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PipelineError::generation("quota exceeded"));
            }
            let mut prompts = self
                .prompts
                .lock()
                .map_err(|_| PipelineError::generation("prompt log poisoned"))?;
            prompts.push(messages.to_vec());
            Ok(format!("answer {}", prompts.len()))
        }
    }

    pub(crate) struct Harness {
        pub(crate) pipeline: Pipeline,
        pub(crate) embedder: Arc<FlakyEmbedder>,
        pub(crate) chat: Arc<ScriptedChat>,
    }

    pub(crate) fn harness_with(config: PipelineConfig, extractor: Arc<dyn PdfExtractor>) -> Harness {
        let embedder = Arc::new(FlakyEmbedder::new());
        let chat = Arc::new(ScriptedChat::default());
        let pipeline = Pipeline::new(config, extractor, embedder.clone(), chat.clone())
            .expect("default test config is valid");
        Harness {
            pipeline,
            embedder,
            chat,
        }
    }

    pub(crate) fn harness() -> Harness {
        harness_with(PipelineConfig::default(), Arc::new(PlainTextExtractor))
    }

    fn upload(text: &str) -> RawDocument {
        RawDocument::new("notes.pdf", text.as_bytes().to_vec())
    }

    fn long_text() -> String {
        "Alpha beta gamma delta\n".repeat(120)
    }

    #[tokio::test]
    async fn new_session_uses_placeholder_index() -> Result<(), PipelineError> {
        let harness = harness();
        let session = Session::start(&harness.pipeline).await?;

        assert_eq!(session.state(), SessionState::Uninitialized);
        assert_eq!(session.indexed_chunks(), 1);
        assert!(session.history().is_empty());

        let hits = session.retrieve(&harness.pipeline, "what should I do?").await?;
        assert_eq!(hits[0].text, PLACEHOLDER_INSTRUCTIONS);
        Ok(())
    }

    #[tokio::test]
    async fn sessions_share_one_placeholder_embedding() -> Result<(), PipelineError> {
        let harness = harness();
        let first = Session::start(&harness.pipeline).await?;
        let second = Session::start(&harness.pipeline).await?;
        let third = Session::start(&harness.pipeline).await?;

        assert_eq!(harness.embedder.batches.load(Ordering::SeqCst), 1);
        assert_ne!(first.id(), second.id());
        assert_eq!(third.indexed_chunks(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn failed_placeholder_embedding_is_retried_on_next_start() -> Result<(), PipelineError> {
        let harness = harness();
        harness.embedder.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            Session::start(&harness.pipeline).await,
            Err(PipelineError::Embedding { .. })
        ));

        harness.embedder.fail.store(false, Ordering::SeqCst);
        let session = Session::start(&harness.pipeline).await?;
        assert_eq!(session.indexed_chunks(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn processing_replaces_index_and_resets_history() -> Result<(), PipelineError> {
        let harness = harness();
        let mut session = Session::start(&harness.pipeline).await?;
        session.ask(&harness.pipeline, "hello?").await?;
        assert_eq!(session.history().len(), 2);

        let outcome = session
            .process_documents(&harness.pipeline, &[upload(&long_text())])
            .await?;

        let ProcessOutcome::Indexed(summary) = outcome else {
            panic!("documents should have been indexed");
        };
        assert!(summary.chunks >= 2);
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.indexed_chunks(), summary.chunks);
        assert!(session.history().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn processing_nothing_leaves_session_untouched() -> Result<(), PipelineError> {
        let harness = harness();
        let mut session = Session::start(&harness.pipeline).await?;
        session.ask(&harness.pipeline, "first").await?;

        let outcome = session.process_documents(&harness.pipeline, &[]).await?;
        assert!(matches!(outcome, ProcessOutcome::NothingUploaded));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.indexed_chunks(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn failed_embedding_keeps_previous_index() -> Result<(), PipelineError> {
        let harness = harness();
        let mut session = Session::start(&harness.pipeline).await?;
        session
            .process_documents(&harness.pipeline, &[upload("first document text")])
            .await?;
        session.ask(&harness.pipeline, "what is it?").await?;

        harness.embedder.fail.store(true, Ordering::SeqCst);
        let result = session
            .process_documents(&harness.pipeline, &[upload(&long_text())])
            .await;
        assert!(matches!(result, Err(PipelineError::Embedding { .. })));

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.indexed_chunks(), 1);
        assert_eq!(session.history().len(), 2);

        harness.embedder.fail.store(false, Ordering::SeqCst);
        let hits = session.retrieve(&harness.pipeline, "document").await?;
        assert_eq!(hits[0].text, "first document text");
        Ok(())
    }

    #[tokio::test]
    async fn failed_generation_does_not_touch_history() -> Result<(), PipelineError> {
        let harness = harness();
        let mut session = Session::start(&harness.pipeline).await?;
        session.ask(&harness.pipeline, "one").await?;

        harness.chat.fail.store(true, Ordering::SeqCst);
        let result = session.ask(&harness.pipeline, "two").await;
        assert!(matches!(result, Err(PipelineError::Generation { .. })));
        assert_eq!(session.history().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn history_grows_by_one_pair_per_question() -> Result<(), PipelineError> {
        let harness = harness();
        let mut session = Session::start(&harness.pipeline).await?;
        session
            .process_documents(&harness.pipeline, &[upload(&long_text())])
            .await?;

        for n in 1..=3 {
            let history = session.ask(&harness.pipeline, &format!("question {n}")).await?;
            assert_eq!(history.len(), 2 * n);
        }

        let turns = session.history().turns();
        assert_eq!(turns[0].role, ChatRole::User);
        assert_eq!(turns[0].content, "question 1");
        assert_eq!(turns[5].role, ChatRole::Assistant);
        assert_eq!(turns[5].content, "answer 3");
        Ok(())
    }

    #[tokio::test]
    async fn second_prompt_carries_first_exchange() -> Result<(), PipelineError> {
        let harness = harness();
        let mut session = Session::start(&harness.pipeline).await?;
        session
            .process_documents(&harness.pipeline, &[upload(&long_text())])
            .await?;

        session.ask(&harness.pipeline, "What does the document discuss?").await?;
        session.ask(&harness.pipeline, "And then?").await?;

        let prompts = harness.chat.prompts.lock().expect("prompt log");
        assert_eq!(prompts.len(), 2);

        let first = &prompts[0];
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].role, PromptRole::System);
        assert!(first[0]
            .content
            .starts_with("Use the following pieces of context to answer the question at the end."));
        assert!(first[0].content.contains("Alpha beta gamma delta"));

        let second = &prompts[1];
        assert_eq!(second.len(), 4);
        assert_eq!(
            second[1],
            PromptMessage::new(PromptRole::User, "What does the document discuss?")
        );
        assert_eq!(second[2], PromptMessage::new(PromptRole::Assistant, "answer 1"));
        assert_eq!(second[3], PromptMessage::new(PromptRole::User, "And then?"));
        Ok(())
    }

    #[tokio::test]
    async fn condensing_rewrites_follow_ups_before_retrieval() -> Result<(), PipelineError> {
        let mut config = PipelineConfig::default();
        config.retrieval.condense_question = true;
        let harness = harness_with(config, Arc::new(PlainTextExtractor));
        let mut session = Session::start(&harness.pipeline).await?;

        session.ask(&harness.pipeline, "first").await?;
        session.ask(&harness.pipeline, "second").await?;

        let prompts = harness.chat.prompts.lock().expect("prompt log");
        // first answer, condense call, second answer
        assert_eq!(prompts.len(), 3);
        assert!(prompts[1][0].content.contains("Follow Up Input: second"));
        assert!(prompts[1][0].content.contains("Human: first"));
        Ok(())
    }

    #[tokio::test]
    async fn blank_questions_are_rejected() -> Result<(), PipelineError> {
        let harness = harness();
        let mut session = Session::start(&harness.pipeline).await?;
        let result = session.ask(&harness.pipeline, "   ").await;
        assert!(matches!(result, Err(PipelineError::EmptyQuestion)));
        assert!(session.history().is_empty());
        assert!(harness.chat.prompts.lock().expect("prompt log").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn end_to_end_with_a_real_pdf() -> Result<(), Box<dyn std::error::Error>> {
        let harness = harness_with(PipelineConfig::default(), Arc::new(LopdfExtractor));
        let pages: Vec<String> = (0..60)
            .map(|n| format!("Alpha beta gamma section {n:02}"))
            .collect();
        let page_refs: Vec<&str> = pages.iter().map(String::as_str).collect();
        let document = RawDocument::new("report.pdf", pdf_with_pages(&page_refs)?);

        let mut session = Session::start(&harness.pipeline).await?;
        let outcome = session.process_documents(&harness.pipeline, &[document]).await?;
        let ProcessOutcome::Indexed(summary) = outcome else {
            return Err("expected an indexed outcome".into());
        };
        assert!(summary.chunks >= 2);
        assert_eq!(summary.documents[0].pages, 60);

        let history = session
            .ask(&harness.pipeline, "What does the document discuss?")
            .await?;
        assert_eq!(history.len(), 2);
        let answer = history.last().ok_or("missing answer")?;
        assert_eq!(answer.role, ChatRole::Assistant);
        assert!(!answer.content.is_empty());
        Ok(())
    }
}

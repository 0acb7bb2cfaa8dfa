mod web;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use pdf_chat_core::config::DEFAULT_OPENAI_BASE_URL;
use pdf_chat_core::presentation::{error_notice, process_notice};
use pdf_chat_core::{
    discover_pdf_files, load_documents, render_history_plain, EmbeddingConfig, Pipeline,
    PipelineConfig, Session,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// API key for the OpenAI-compatible endpoints
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    openai_base_url: String,

    /// Chat completion model
    #[arg(long, default_value = "gpt-3.5-turbo")]
    chat_model: String,

    /// Sampling temperature for answers
    #[arg(long, default_value = "0.7")]
    temperature: f32,

    /// Where chunk and question embeddings come from.
    #[arg(long, value_enum, default_value_t = EmbeddingChoice::Openai)]
    embeddings: EmbeddingChoice,

    /// Number of chunks retrieved per question
    #[arg(long, default_value = "4")]
    top_k: usize,

    /// Rewrite follow-up questions into standalone ones before retrieval.
    #[arg(long, default_value_t = false)]
    condense_question: bool,

    /// Text inserted between extracted pages and documents.
    #[arg(long, default_value = "")]
    page_separator: String,

    /// Skip unreadable PDFs instead of failing the whole upload.
    #[arg(long, default_value_t = false)]
    skip_unreadable: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbeddingChoice {
    /// Paid OpenAI embeddings
    Openai,
    /// Free local hashed n-gram embeddings
    Local,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the chat UI over HTTP.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:8501")]
        bind: String,
        /// Largest accepted upload, in megabytes.
        #[arg(long, default_value = "64")]
        max_upload_mb: usize,
        /// Minutes a browser session may sit idle before it is dropped.
        #[arg(long, default_value = "60")]
        session_ttl_mins: u64,
    },
    /// Chat with PDFs in the terminal, one question per line on stdin.
    Chat {
        /// PDF file to process; repeatable.
        #[arg(long)]
        pdf: Vec<PathBuf>,
        /// Folder searched recursively for PDFs.
        #[arg(long)]
        folder: Option<PathBuf>,
    },
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();

        config.extraction.page_separator = self.page_separator.clone();
        config.extraction.skip_unreadable = self.skip_unreadable;

        config.embedding = match self.embeddings {
            EmbeddingChoice::Openai => EmbeddingConfig::default(),
            EmbeddingChoice::Local => EmbeddingConfig::local(),
        };
        config.embedding.base_url = self.openai_base_url.clone();

        config.retrieval.top_k = self.top_k;
        config.retrieval.condense_question = self.condense_question;

        config.chat.model = self.chat_model.clone();
        config.chat.temperature = self.temperature;
        config.chat.base_url = self.openai_base_url.clone();
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.pipeline_config();
    let pipeline = Pipeline::from_config(config, cli.openai_api_key.as_deref())
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        chat_model = pipeline.chat_model().model_id(),
        "pdf-chat boot"
    );

    match cli.command {
        Command::Serve {
            bind,
            max_upload_mb,
            session_ttl_mins,
        } => {
            web::serve(
                Arc::new(pipeline),
                &bind,
                max_upload_mb * 1024 * 1024,
                Duration::from_secs(session_ttl_mins * 60),
            )
            .await
        }
        Command::Chat { pdf, folder } => chat(&pipeline, pdf, folder).await,
    }
}

async fn chat(pipeline: &Pipeline, mut paths: Vec<PathBuf>, folder: Option<PathBuf>) -> anyhow::Result<()> {
    if let Some(folder) = folder {
        let found = discover_pdf_files(&folder);
        if found.is_empty() {
            warn!(folder = %folder.display(), "no pdf files found");
        }
        paths.extend(found);
    }

    let mut session = Session::start(pipeline)
        .await
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    let documents = load_documents(&paths).map_err(|error| anyhow::anyhow!(error.to_string()))?;
    match session.process_documents(pipeline, &documents).await {
        Ok(outcome) => println!("{}", process_notice(&outcome)),
        Err(error) => println!("{}", error_notice(&error)),
    }

    println!("Ask a question (\"/history\" shows the conversation, Ctrl-D quits).");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "/history" {
            println!("{}", render_history_plain(session.history()));
            continue;
        }

        match session.ask(pipeline, question).await {
            Ok(history) => {
                if let Some(answer) = history.last() {
                    println!("[bot] {}", answer.content);
                }
            }
            Err(error) => println!("{}", error_notice(&error)),
        }
    }

    Ok(())
}

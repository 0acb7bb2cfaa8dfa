use crate::config::ExtractionConfig;
use crate::error::PipelineError;
use crate::models::{DocumentSummary, RawDocument, SkippedDocument};
use lopdf::Document;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, document: &RawDocument) -> Result<Vec<PageText>, PipelineError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, document: &RawDocument) -> Result<Vec<PageText>, PipelineError> {
        let parsed = Document::load_mem(&document.bytes).map_err(|error| {
            PipelineError::Extraction(format!("{} is not a readable pdf: {error}", document.name))
        })?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in parsed.get_pages() {
            let text = parsed.extract_text(&[page_no]).map_err(|error| {
                PipelineError::Extraction(format!(
                    "{} page {page_no} could not be decoded: {error}",
                    document.name
                ))
            })?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(PipelineError::Extraction(format!(
                "pdf had no readable page text: {}",
                document.name
            )));
        }

        Ok(pages)
    }
}

/// Concatenated text of a batch of uploads plus what happened to each file.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub documents: Vec<DocumentSummary>,
    pub skipped: Vec<SkippedDocument>,
}

/// Joins every page of every document, in upload order then page order.
///
/// Pages are joined with `config.page_separator` (empty by default). With
/// `skip_unreadable` a bad file is reported in `skipped` instead of failing the
/// batch, but a batch where nothing was readable is still an error.
pub fn extract_text<E>(
    extractor: &E,
    documents: &[RawDocument],
    config: &ExtractionConfig,
) -> Result<ExtractedText, PipelineError>
where
    E: PdfExtractor + ?Sized,
{
    if documents.is_empty() {
        return Err(PipelineError::Extraction("no documents supplied".to_string()));
    }

    let mut page_texts = Vec::new();
    let mut summaries = Vec::new();
    let mut skipped = Vec::new();

    for document in documents {
        match extractor.extract_pages(document) {
            Ok(pages) => {
                debug!(document = %document.name, pages = pages.len(), "extracted pdf text");
                summaries.push(DocumentSummary {
                    name: document.name.clone(),
                    checksum: document.checksum(),
                    pages: pages.len(),
                });
                page_texts.extend(pages.into_iter().map(|page| page.text));
            }
            Err(error) if config.skip_unreadable => {
                warn!(document = %document.name, reason = %error, "skipped pdf");
                skipped.push(SkippedDocument {
                    name: document.name.clone(),
                    reason: error.to_string(),
                });
            }
            Err(error) => return Err(error),
        }
    }

    if page_texts.is_empty() {
        return Err(PipelineError::Extraction(format!(
            "none of the {} uploaded documents had readable text",
            documents.len()
        )));
    }

    Ok(ExtractedText {
        text: page_texts.join(&config.page_separator),
        documents: summaries,
        skipped,
    })
}

use crate::error::PipelineError;
use crate::models::RawDocument;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();

    files.sort_unstable();
    files
}

/// Reads each path into a [`RawDocument`], keeping the given order.
pub fn load_documents(paths: &[PathBuf]) -> Result<Vec<RawDocument>, PipelineError> {
    paths
        .iter()
        .map(|path| {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
                .unwrap_or_else(|| path.display().to_string());
            Ok::<_, PipelineError>(RawDocument::new(name, fs::read(path)?))
        })
        .collect()
}

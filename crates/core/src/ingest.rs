use crate::error::{RagError, Result};
use crate::retrieval::RetrievalService;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

const TEXT_EXTENSIONS: [&str; 3] = ["txt", "md", "markdown"];

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            TEXT_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// A single file is returned as is; a folder is walked recursively for
/// text and markdown files, sorted by path.
pub fn discover_text_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(RagError::NotFound {
            entity: "path",
            id: path.display().to_string(),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).into_iter().filter_map(|item| item.ok()) {
        if entry.file_type().is_file() && is_text_file(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

/// Reads a UTF-8 text file, returning its file name and contents.
pub fn read_text_file(path: &Path) -> Result<(String, String)> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| RagError::Config(format!("path has no file name: {}", path.display())))?
        .to_string();
    let content = std::fs::read_to_string(path)?;
    Ok((filename, content))
}

#[derive(Debug)]
pub struct IngestedFile {
    pub path: PathBuf,
    pub document_id: String,
}

#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub ingested: Vec<IngestedFile>,
    pub skipped: Vec<SkippedFile>,
}

/// Ingests every text file under `path` for `expert_id`.
///
/// Files are independent: one that cannot be read or embedded is recorded
/// in [`IngestionReport::skipped`] and the rest carry on. Finding no files
/// at all is an error.
pub async fn ingest_path(
    service: &RetrievalService,
    expert_id: &str,
    path: &Path,
) -> Result<IngestionReport> {
    let files = discover_text_files(path)?;
    if files.is_empty() {
        return Err(RagError::Config(format!(
            "no text files found in {}",
            path.display()
        )));
    }

    let mut report = IngestionReport::default();
    for file in files {
        let outcome = match read_text_file(&file) {
            Ok((filename, content)) => service.ingest_document(expert_id, &filename, &content).await,
            Err(error) => Err(error),
        };

        match outcome {
            Ok(document_id) => report.ingested.push(IngestedFile {
                path: file,
                document_id,
            }),
            Err(error) => {
                warn!(path = %file.display(), %error, "skipping file");
                report.skipped.push(SkippedFile {
                    path: file,
                    reason: error.to_string(),
                });
            }
        }
    }

    info!(
        expert_id,
        ingested = report.ingested.len(),
        skipped = report.skipped.len(),
        "folder ingest finished"
    );
    Ok(report)
}

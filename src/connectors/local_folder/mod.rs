#[cfg(test)]
mod tests;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::HarvesterError;
use chrono::{DateTime, Utc};
use pulldown_cmark::{Event, Parser};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{Connector, SearchResult, make_snippet};

const ALLOWED_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "json", "yaml", "yml"];

/// Reads documents from a directory tree. Per-project upload folders are
/// served by the same connector rooted at the project's uploads directory.
#[derive(Debug, Clone)]
pub struct LocalFolderConnector {
    root: PathBuf,
}

impl LocalFolderConnector {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collect_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        if !self.root.exists() {
            debug!("Folder {} does not exist, nothing to scan", self.root.display());
            return Ok(files);
        }

        walk_directory(&self.root, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn read_document(&self, path: &Path) -> SearchResult {
        let title = path
            .file_stem()
            .map_or_else(|| "untitled".to_string(), |s| s.to_string_lossy().to_string());

        let file_type = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());

        let last_modified = file_modified_time(path);

        // Extraction failures still produce a document so the failure is
        // visible in the corpus rather than silently skipped.
        let raw_text = match extract_text(path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to extract text from {}: {}", path.display(), e);
                format!("[extraction error: {e}]")
            }
        };

        SearchResult {
            doc_id: document_id(path),
            title,
            snippet: make_snippet(&raw_text),
            raw_text,
            source_type: self.source_type().to_string(),
            source_url: Some(format!("file://{}", path.display())),
            source_meta: serde_json::json!({ "path": path.display().to_string() }),
            file_type,
            last_modified,
        }
    }
}

#[async_trait]
impl Connector for LocalFolderConnector {
    fn source_type(&self) -> &'static str {
        "local_folder"
    }

    async fn test_connection(&self) -> Result<bool> {
        Ok(self.root.is_dir())
    }

    async fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<SearchResult>> {
        let files = self.collect_files()?;
        let query_lower = query.to_lowercase();

        let mut results = Vec::new();
        for path in files {
            if let Some(limit) = limit {
                if results.len() >= limit {
                    break;
                }
            }

            let result = self.read_document(&path);
            if query.is_empty()
                || result.title.to_lowercase().contains(&query_lower)
                || result.raw_text.to_lowercase().contains(&query_lower)
            {
                results.push(result);
            }
        }

        debug!(
            "Local folder {} matched {} documents for query {:?}",
            self.root.display(),
            results.len(),
            query
        );
        Ok(results)
    }

    async fn fetch_document(&self, doc_id: &str) -> Result<Option<SearchResult>> {
        for path in self.collect_files()? {
            if document_id(&path) == doc_id {
                return Ok(Some(self.read_document(&path)));
            }
        }
        Ok(None)
    }
}

fn walk_directory(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| {
        HarvesterError::Connector(format!("Failed to read directory {}: {e}", dir.display()))
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| {
            HarvesterError::Connector(format!("Failed to read entry in {}: {e}", dir.display()))
        })?;
        let path = entry.path();

        if path.is_dir() {
            walk_directory(&path, files)?;
        } else if let Some(extension) = path.extension() {
            let ext = extension.to_string_lossy().to_lowercase();
            if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
                files.push(path);
            }
        }
    }

    Ok(())
}

/// Content-independent identity: the hash of the absolute path. A file
/// edited in place keeps its doc_id, so re-ingestion updates rather than
/// duplicates.
pub fn document_id(path: &Path) -> String {
    let absolute = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());

    let mut hasher = Sha256::new();
    hasher.update(absolute.display().to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn file_modified_time(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

fn extract_text(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "md" | "markdown" => Ok(markdown_to_text(&content)),
        "json" => {
            let value: serde_json::Value =
                serde_json::from_str(&content).context("Invalid JSON")?;
            serde_json::to_string_pretty(&value).context("Failed to re-serialize JSON")
        }
        "yaml" | "yml" => {
            let value: serde_yaml::Value =
                serde_yaml::from_str(&content).context("Invalid YAML")?;
            serde_yaml::to_string(&value).context("Failed to re-serialize YAML")
        }
        _ => Ok(content),
    }
}

/// Flatten markdown to plain text, dropping formatting but keeping the
/// prose and code content.
fn markdown_to_text(markdown: &str) -> String {
    let mut text = String::with_capacity(markdown.len());

    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push(' '),
            Event::End(_) => {
                if !text.ends_with(' ') && !text.is_empty() {
                    text.push(' ');
                }
            }
            _ => {}
        }
    }

    text.trim().to_string()
}

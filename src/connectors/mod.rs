// Document sources. Each connector turns an external store into a uniform
// stream of search results the ingestion pipeline can persist.

pub mod local_folder;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use anyhow::Result;

/// One document surfaced by a connector.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Stable identity for the document, derived from its source location.
    /// Re-ingesting the same source yields the same doc_id.
    pub doc_id: String,
    pub title: String,
    /// First part of the extracted text, for listings.
    pub snippet: String,
    pub raw_text: String,
    pub source_type: String,
    pub source_url: Option<String>,
    pub source_meta: Value,
    pub file_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Short identifier used as the document `source_type`.
    fn source_type(&self) -> &'static str;

    /// Whether the source is reachable right now. A false result is a
    /// state, not an error.
    async fn test_connection(&self) -> Result<bool>;

    /// Find documents matching the query. An empty query with no limit
    /// returns everything the connector can see, which is how full
    /// ingestion enumerates a source.
    async fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<SearchResult>>;

    /// Fetch a single document by its stable id.
    async fn fetch_document(&self, doc_id: &str) -> Result<Option<SearchResult>>;
}

pub(crate) const SNIPPET_LENGTH: usize = 200;

pub(crate) fn make_snippet(text: &str) -> String {
    text.chars().take(SNIPPET_LENGTH).collect()
}

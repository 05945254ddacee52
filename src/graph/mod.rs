// Knowledge graph seam. Ingestion writes document nodes, entities, and
// relationships here on a best-effort basis; a failed or absent store
// never fails a document.


use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::llm::EntityRelationship;
use crate::processing::classifier::LensType;

/// One entity occurrence extracted from a chunk, together with any
/// relationships the extractor reported for it.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub name: String,
    pub lens_type: LensType,
    pub chunk_index: i64,
    pub relationships: Vec<EntityRelationship>,
}

/// Filters for entity lookups. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFilter {
    pub lens_type: Option<LensType>,
    pub name_contains: Option<String>,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Whether the store can accept writes right now. Callers skip graph
    /// work entirely when this is false.
    fn is_available(&self) -> bool;

    /// Create or update the node for a document. Returns whether the
    /// write landed.
    async fn upsert_document_node(&self, doc_id: &str, attrs: &Value) -> Result<bool>;

    /// Attach an entity (and its relationships) to a document node.
    /// Returns whether the write landed.
    async fn upsert_entity_and_relationship(
        &self,
        doc_id: &str,
        entity: &EntityRecord,
    ) -> Result<bool>;

    async fn query_entities(
        &self,
        project_id: i64,
        filter: &EntityFilter,
    ) -> Result<Vec<EntityRecord>>;
}

/// Placeholder store used when no graph backend is configured. All writes
/// are skipped and logged at debug level.
#[derive(Debug, Default, Clone)]
pub struct UnavailableGraphStore;

#[async_trait]
impl GraphStore for UnavailableGraphStore {
    fn is_available(&self) -> bool {
        false
    }

    async fn upsert_document_node(&self, doc_id: &str, _attrs: &Value) -> Result<bool> {
        debug!("Graph store unavailable, skipping document node {}", doc_id);
        Ok(false)
    }

    async fn upsert_entity_and_relationship(
        &self,
        doc_id: &str,
        entity: &EntityRecord,
    ) -> Result<bool> {
        debug!(
            "Graph store unavailable, skipping entity {} for document {}",
            entity.name, doc_id
        );
        Ok(false)
    }

    async fn query_entities(
        &self,
        project_id: i64,
        _filter: &EntityFilter,
    ) -> Result<Vec<EntityRecord>> {
        debug!(
            "Graph store unavailable, no entities for project {}",
            project_id
        );
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::HarvesterError;
use crate::config::Config;
use crate::connectors::local_folder::LocalFolderConnector;
use crate::connectors::{Connector, SearchResult};
use crate::database::models::{
    GenerationStatus, NewDocument, NewDocumentChunk, Project, TaskType,
};
use crate::database::queries::DocumentQueries;
use crate::embeddings::EmbeddingProvider;
use crate::graph::{EntityRecord, GraphStore, UnavailableGraphStore};
use crate::llm::{EntityExtraction, LlmService, entity_schema};
use crate::processing::chunker::TextChunker;
use crate::processing::classifier::LensClassifier;
use crate::processing::scoring::ImportanceScorer;
use crate::tasks::ProgressTracker;
use crate::wiki::WikiGenerator;

/// Outcome for one document that went through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentResult {
    pub doc_id: String,
    pub title: String,
    pub status: String,
    pub chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionSummary {
    pub documents_processed: usize,
    pub errors: usize,
    pub results: Vec<DocumentResult>,
}

/// Chunks, classifies, embeds, scores, and persists one document. Shared
/// by connector ingestion and generated-document backfill, so every
/// document reaches storage through the same path.
pub struct DocumentProcessor {
    pool: SqlitePool,
    chunker: TextChunker,
    classifier: LensClassifier,
    scorer: ImportanceScorer,
    embeddings: EmbeddingProvider,
    llm: Option<Arc<LlmService>>,
    graph: Arc<dyn GraphStore>,
}

impl DocumentProcessor {
    pub fn new(
        pool: SqlitePool,
        config: &Config,
        llm: Option<Arc<LlmService>>,
        graph: Arc<dyn GraphStore>,
    ) -> Self {
        Self {
            pool,
            chunker: TextChunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap),
            classifier: LensClassifier::new(llm.clone()),
            scorer: ImportanceScorer::default(),
            embeddings: EmbeddingProvider::new(&config.embedding),
            llm,
            graph,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn llm(&self) -> Option<&Arc<LlmService>> {
        self.llm.as_ref()
    }

    /// Process one document end to end. The document and all of its
    /// chunks are committed in a single transaction; graph writes happen
    /// afterwards and are best-effort.
    pub async fn process_document(
        &self,
        project: &Project,
        result: &SearchResult,
        generation_status: GenerationStatus,
    ) -> Result<usize> {
        let text_chunks = self.chunker.chunk_text(&result.raw_text);
        let project_context = project.description.clone().unwrap_or_default();
        let now = chrono::Utc::now();

        let texts: Vec<String> = text_chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embeddings.embed_batch(&texts);

        let mut chunks = Vec::with_capacity(text_chunks.len());
        let mut entity_records = Vec::new();

        for (index, (chunk, embedding)) in
            text_chunks.iter().zip(embeddings.into_iter()).enumerate()
        {
            let (lens_type, confidence) = self.classifier.classify(&chunk.text, &project_context);

            // Entity extraction is best-effort; a failed call leaves the
            // chunk without entities rather than failing the document.
            let extraction = match &self.llm {
                Some(llm) => {
                    let schema = entity_schema(Some(lens_type));
                    llm.extract_entities(&chunk.text, &schema, Some(lens_type))
                        .unwrap_or_else(|e| {
                            debug!("Entity extraction failed for chunk {}: {}", index, e);
                            EntityExtraction::default()
                        })
                }
                None => EntityExtraction::default(),
            };

            let score = self.scorer.score(
                result.last_modified,
                &result.source_type,
                lens_type,
                now,
            );

            for entity in &extraction.entities {
                let relationships = extraction
                    .relationships
                    .iter()
                    .filter(|r| r.source == *entity)
                    .cloned()
                    .collect();
                entity_records.push(EntityRecord {
                    name: entity.clone(),
                    lens_type,
                    chunk_index: index as i64,
                    relationships,
                });
            }

            chunks.push(NewDocumentChunk {
                chunk_index: index as i64,
                text: chunk.text.clone(),
                embedding,
                lens_type,
                confidence_score: f64::from(confidence),
                recency_score: score.recency_score,
                source_weight: score.source_weight,
                lens_weight: score.lens_weight,
                importance_score: score.importance,
                tokens: chunk.tokens as i64,
                chunk_metadata: serde_json::json!({
                    "start_index": chunk.start_index,
                    "end_index": chunk.end_index,
                    "entities": extraction.entities,
                }),
                is_generated: generation_status != GenerationStatus::Manual,
                generation_status,
            });
        }

        let new_doc = NewDocument {
            project_id: project.id,
            doc_id: result.doc_id.clone(),
            title: result.title.clone(),
            source_type: result.source_type.clone(),
            source_url: result.source_url.clone(),
            source_meta: result.source_meta.clone(),
            raw_text: result.raw_text.clone(),
            file_type: result.file_type.clone(),
            last_modified: result.last_modified,
        };

        let (_document_id, chunk_count) =
            DocumentQueries::upsert_with_chunks(&self.pool, &new_doc, &chunks).await?;

        if self.graph.is_available() {
            let attrs = serde_json::json!({
                "project_id": project.id,
                "title": result.title,
                "source_type": result.source_type,
            });
            if let Err(e) = self.graph.upsert_document_node(&result.doc_id, &attrs).await {
                warn!("Graph write failed for document {}: {}", result.doc_id, e);
            }
            for record in &entity_records {
                if let Err(e) = self
                    .graph
                    .upsert_entity_and_relationship(&result.doc_id, record)
                    .await
                {
                    warn!(
                        "Graph entity write failed for document {}: {}",
                        result.doc_id, e
                    );
                }
            }
        }

        Ok(chunk_count)
    }
}

/// Runs full-project ingestion: enumerate connectors, push every document
/// through the processor, track progress, and kick off a wiki refresh when
/// anything changed.
pub struct IngestionOrchestrator {
    processor: Arc<DocumentProcessor>,
    tracker: Arc<ProgressTracker>,
    uploads_dir: PathBuf,
}

impl IngestionOrchestrator {
    pub fn new(
        processor: Arc<DocumentProcessor>,
        tracker: Arc<ProgressTracker>,
        uploads_dir: PathBuf,
    ) -> Self {
        Self {
            processor,
            tracker,
            uploads_dir,
        }
    }

    pub fn from_config(
        pool: SqlitePool,
        config: &Config,
        llm: Option<Arc<LlmService>>,
    ) -> Self {
        let graph: Arc<dyn GraphStore> = Arc::new(UnavailableGraphStore);
        let processor = Arc::new(DocumentProcessor::new(pool.clone(), config, llm, graph));
        let tracker = Arc::new(ProgressTracker::new(pool));
        Self::new(processor, tracker, config.uploads_dir())
    }

    /// Ingest every configured source for a project. Individual document
    /// failures are recorded but never abort the run; the tracking task
    /// always reaches a terminal state.
    pub async fn ingest_project(&self, project_id: i64) -> Result<IngestionSummary> {
        let project = crate::database::queries::ProjectQueries::get_by_id(
            self.processor.pool(),
            project_id,
        )
        .await?
        .ok_or_else(|| HarvesterError::NotFound(format!("Project: {project_id}")))?;

        let task = self.tracker.create(TaskType::Ingestion, project_id).await?;

        let summary = match self.run_ingestion(&project, task.id).await {
            Ok(summary) => {
                self.tracker
                    .complete(
                        task.id,
                        Some(serde_json::json!({
                            "documents_processed": summary.documents_processed,
                            "errors": summary.errors,
                        })),
                    )
                    .await?;
                summary
            }
            Err(e) => {
                self.tracker.fail(task.id, &e.to_string()).await?;
                return Err(e);
            }
        };

        if summary.documents_processed > 0 {
            self.spawn_wiki_refresh(project_id);
        }

        Ok(summary)
    }

    async fn run_ingestion(&self, project: &Project, task_id: i64) -> Result<IngestionSummary> {
        let connectors = self.build_connectors(project);
        info!(
            "Ingesting project {} from {} sources",
            project.id,
            connectors.len()
        );

        self.tracker
            .update_progress(task_id, 5.0, "enumerating_sources")
            .await?;

        let mut documents: Vec<SearchResult> = Vec::new();
        for connector in &connectors {
            match connector.test_connection().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        "Connector {} unreachable for project {}, skipping",
                        connector.source_type(),
                        project.id
                    );
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Connection test for {} failed for project {}: {}",
                        connector.source_type(),
                        project.id,
                        e
                    );
                    continue;
                }
            }

            // A broken source must not block the others.
            match connector.search("", None).await {
                Ok(results) => documents.extend(results),
                Err(e) => {
                    warn!(
                        "Connector {} failed for project {}: {}",
                        connector.source_type(),
                        project.id,
                        e
                    );
                }
            }
        }

        let total = documents.len();
        let mut results = Vec::with_capacity(total);
        let mut processed = 0;
        let mut errors = 0;

        for (index, document) in documents.iter().enumerate() {
            let percent = 10.0 + (index as f64 / total.max(1) as f64) * 85.0;
            self.tracker
                .update_progress(task_id, percent, "processing_documents")
                .await?;

            match self
                .processor
                .process_document(project, document, GenerationStatus::Manual)
                .await
            {
                Ok(chunk_count) => {
                    processed += 1;
                    results.push(DocumentResult {
                        doc_id: document.doc_id.clone(),
                        title: document.title.clone(),
                        status: "ok".to_string(),
                        chunk_count,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("Failed to ingest document {}: {}", document.doc_id, e);
                    errors += 1;
                    results.push(DocumentResult {
                        doc_id: document.doc_id.clone(),
                        title: document.title.clone(),
                        status: "error".to_string(),
                        chunk_count: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            "Ingestion for project {} finished: {} processed, {} errors",
            project.id, processed, errors
        );

        Ok(IngestionSummary {
            documents_processed: processed,
            errors,
            results,
        })
    }

    /// Every project reads its uploads folder; additional sources come
    /// from the project's connector configuration.
    fn build_connectors(&self, project: &Project) -> Vec<Box<dyn Connector>> {
        let mut connectors: Vec<Box<dyn Connector>> = vec![Box::new(LocalFolderConnector::new(
            self.uploads_dir.join(project.id.to_string()),
        ))];

        if let Some(folder) = project.connector_configs.0.get("local_folder") {
            if let Some(path) = folder.get("path").and_then(|p| p.as_str()) {
                connectors.push(Box::new(LocalFolderConnector::new(path)));
            } else {
                warn!(
                    "local_folder connector for project {} has no path, skipping",
                    project.id
                );
            }
        }

        connectors
    }

    fn spawn_wiki_refresh(&self, project_id: i64) {
        let generator = WikiGenerator::new(self.processor.clone(), self.tracker.clone());
        tokio::spawn(async move {
            if let Err(e) = generator.generate_wiki(project_id).await {
                warn!("Background wiki refresh failed for project {}: {}", project_id, e);
            }
        });
    }
}

use std::fs;
use std::sync::Mutex;

use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

use super::*;
use crate::database::models::NewProject;
use crate::database::queries::{ChunkQueries, ProjectQueries, TaskQueries};
use crate::graph::EntityFilter;

async fn setup() -> (TempDir, SqlitePool, Config) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(temp_dir.path().join("test.db"))
                .create_if_missing(true)
                .foreign_keys(true),
        )
        .await
        .expect("Failed to create test pool");

    sqlx::query(include_str!("../database/migrations/0001_initial.sql"))
        .execute(&pool)
        .await
        .expect("Failed to run migrations");

    let config = Config::load(temp_dir.path()).expect("Failed to load config");
    (temp_dir, pool, config)
}

async fn create_project(pool: &SqlitePool, configs: serde_json::Value) -> Project {
    ProjectQueries::create(
        pool,
        NewProject {
            name: "ingest-test".to_string(),
            description: Some("Test corpus".to_string()),
            tags: Vec::new(),
            owners: Vec::new(),
            connector_configs: configs,
        },
    )
    .await
    .expect("Failed to create project")
}

fn seed_uploads(config: &Config, project_id: i64) {
    let dir = config.uploads_dir().join(project_id.to_string());
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("architecture.md"),
        "# Architecture\n\nThe system design uses a database schema with several modules.",
    )
    .unwrap();
    fs::write(
        dir.join("setup.txt"),
        "Step 1: configure the user account. Step 2: click the setup guide.",
    )
    .unwrap();
}

#[tokio::test]
async fn ingest_from_uploads_folder() {
    let (_temp_dir, pool, config) = setup().await;
    let project = create_project(&pool, serde_json::json!({})).await;
    seed_uploads(&config, project.id);

    let orchestrator = IngestionOrchestrator::from_config(pool.clone(), &config, None);
    let summary = orchestrator.ingest_project(project.id).await.unwrap();

    assert_eq!(summary.documents_processed, 2);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.results.len(), 2);
    assert!(summary.results.iter().all(|r| r.status == "ok"));
    assert!(summary.results.iter().all(|r| r.chunk_count > 0));

    let documents = DocumentQueries::list_by_project(&pool, project.id).await.unwrap();
    assert_eq!(documents.len(), 2);
    assert!(documents.iter().all(|d| d.source_type == "local_folder"));
}

#[tokio::test]
async fn chunks_carry_scores_and_embeddings() {
    let (_temp_dir, pool, config) = setup().await;
    let project = create_project(&pool, serde_json::json!({})).await;
    seed_uploads(&config, project.id);

    let orchestrator = IngestionOrchestrator::from_config(pool.clone(), &config, None);
    orchestrator.ingest_project(project.id).await.unwrap();

    let documents = DocumentQueries::list_by_project(&pool, project.id).await.unwrap();
    for document in &documents {
        let chunks = ChunkQueries::list_by_document(&pool, document.id).await.unwrap();
        assert!(!chunks.is_empty());

        for chunk in &chunks {
            assert_eq!(chunk.embedding.0.len(), 1536);
            assert!((0.3..=0.9).contains(&(chunk.confidence_score as f32)));
            assert!(chunk.importance_score > 0.0 && chunk.importance_score <= 1.0);
            // local_folder weight and component weights are recorded.
            assert_eq!(chunk.source_weight, 0.7);
            assert!(!chunk.is_generated);

            let metadata = &chunk.chunk_metadata.0;
            assert!(metadata.get("start_index").is_some());
            assert!(metadata.get("end_index").is_some());
            assert!(metadata.get("entities").unwrap().is_array());
        }
    }
}

#[tokio::test]
async fn configured_local_folder_is_ingested() {
    let (temp_dir, pool, config) = setup().await;

    let source_dir = temp_dir.path().join("source-docs");
    fs::create_dir_all(&source_dir).unwrap();
    fs::write(source_dir.join("pricing.md"), "Our pricing strategy targets the market.").unwrap();

    let project = create_project(
        &pool,
        serde_json::json!({ "local_folder": { "path": source_dir.display().to_string() } }),
    )
    .await;

    let orchestrator = IngestionOrchestrator::from_config(pool.clone(), &config, None);
    let summary = orchestrator.ingest_project(project.id).await.unwrap();

    assert_eq!(summary.documents_processed, 1);
    assert_eq!(summary.results[0].title, "pricing");
}

#[tokio::test]
async fn broken_connector_does_not_block_others() {
    let (_temp_dir, pool, config) = setup().await;

    let project = create_project(
        &pool,
        serde_json::json!({ "local_folder": { "path": "/nonexistent/source" } }),
    )
    .await;
    seed_uploads(&config, project.id);

    let orchestrator = IngestionOrchestrator::from_config(pool.clone(), &config, None);
    let summary = orchestrator.ingest_project(project.id).await.unwrap();

    // Uploads still land even though the configured folder is missing.
    assert_eq!(summary.documents_processed, 2);
}

#[tokio::test]
async fn empty_project_completes_cleanly() {
    let (_temp_dir, pool, config) = setup().await;
    let project = create_project(&pool, serde_json::json!({})).await;

    let orchestrator = IngestionOrchestrator::from_config(pool.clone(), &config, None);
    let summary = orchestrator.ingest_project(project.id).await.unwrap();

    assert_eq!(summary.documents_processed, 0);
    assert_eq!(summary.errors, 0);

    // The tracking task still reached a terminal state.
    let tasks = TaskQueries::list_by_project(&pool, project.id).await.unwrap();
    let ingestion = tasks
        .iter()
        .find(|t| t.task_type == TaskType::Ingestion)
        .unwrap();
    assert!(ingestion.is_terminal());
}

#[tokio::test]
async fn reingestion_replaces_documents() {
    let (_temp_dir, pool, config) = setup().await;
    let project = create_project(&pool, serde_json::json!({})).await;
    seed_uploads(&config, project.id);

    let orchestrator = IngestionOrchestrator::from_config(pool.clone(), &config, None);
    orchestrator.ingest_project(project.id).await.unwrap();

    // Edit one file in place, then re-ingest.
    let uploads = config.uploads_dir().join(project.id.to_string());
    fs::write(
        uploads.join("architecture.md"),
        "# Architecture\n\nCompletely rewritten design notes about the api schema.",
    )
    .unwrap();

    orchestrator.ingest_project(project.id).await.unwrap();

    let documents = DocumentQueries::list_by_project(&pool, project.id).await.unwrap();
    assert_eq!(documents.len(), 2, "re-ingestion must not duplicate documents");

    let rewritten = documents.iter().find(|d| d.title == "architecture").unwrap();
    assert!(rewritten.raw_text.contains("Completely rewritten"));

    let chunks = ChunkQueries::list_by_document(&pool, rewritten.id).await.unwrap();
    assert!(chunks.iter().all(|c| c.text.contains("rewritten") || c.text.contains("api")));
}

#[derive(Default)]
struct RecordingGraphStore {
    documents: Mutex<Vec<String>>,
    entities: Mutex<Vec<(String, EntityRecord)>>,
}

#[async_trait::async_trait]
impl GraphStore for RecordingGraphStore {
    fn is_available(&self) -> bool {
        true
    }

    async fn upsert_document_node(&self, doc_id: &str, _attrs: &serde_json::Value) -> Result<bool> {
        self.documents.lock().unwrap().push(doc_id.to_string());
        Ok(true)
    }

    async fn upsert_entity_and_relationship(
        &self,
        doc_id: &str,
        entity: &EntityRecord,
    ) -> Result<bool> {
        self.entities
            .lock()
            .unwrap()
            .push((doc_id.to_string(), entity.clone()));
        Ok(true)
    }

    async fn query_entities(
        &self,
        _project_id: i64,
        filter: &EntityFilter,
    ) -> Result<Vec<EntityRecord>> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .map(|(_, entity)| entity.clone())
            .filter(|entity| {
                filter.lens_type.is_none_or(|lens| entity.lens_type == lens)
                    && filter
                        .name_contains
                        .as_ref()
                        .is_none_or(|needle| entity.name.contains(needle.as_str()))
            })
            .collect())
    }
}

#[tokio::test]
async fn documents_reach_the_graph_store() {
    let (_temp_dir, pool, config) = setup().await;
    let project = create_project(&pool, serde_json::json!({})).await;

    let graph = Arc::new(RecordingGraphStore::default());
    let processor = DocumentProcessor::new(pool.clone(), &config, None, graph.clone());

    let result = SearchResult {
        doc_id: "doc-abc".to_string(),
        title: "runbook".to_string(),
        snippet: "Step 1".to_string(),
        raw_text: "Step 1: restart the service. Step 2: verify the logs.".to_string(),
        source_type: "local_folder".to_string(),
        source_url: None,
        source_meta: serde_json::json!({}),
        file_type: Some("md".to_string()),
        last_modified: None,
    };

    processor
        .process_document(&project, &result, GenerationStatus::Manual)
        .await
        .unwrap();

    assert_eq!(graph.documents.lock().unwrap().as_slice(), ["doc-abc"]);
    // Without an LLM there is no entity extraction, so no entity writes.
    let entities = graph.query_entities(project.id, &EntityFilter::default()).await.unwrap();
    assert!(entities.is_empty());
}

#[tokio::test]
async fn ingestion_failure_marks_task_failed() {
    let (_temp_dir, pool, config) = setup().await;

    let orchestrator = IngestionOrchestrator::from_config(pool.clone(), &config, None);
    // Unknown project: the orchestrator errors before creating a task.
    let error = orchestrator.ingest_project(999).await.unwrap_err();
    assert!(matches!(
        error.downcast_ref::<crate::HarvesterError>(),
        Some(crate::HarvesterError::NotFound(_))
    ));
}

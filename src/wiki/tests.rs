use std::sync::Arc;

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

use super::*;
use crate::config::Config;
use crate::database::models::{NewDocument, NewDocumentChunk, NewProject};
use crate::database::queries::{DocumentQueries, ProjectQueries};
use crate::graph::UnavailableGraphStore;

async fn setup() -> (TempDir, SqlitePool, Project) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
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

    let project = ProjectQueries::create(
        &pool,
        NewProject {
            name: "wiki-test".to_string(),
            description: Some("A documentation corpus".to_string()),
            ..Default::default()
        },
    )
    .await
    .expect("Failed to create project");

    (temp_dir, pool, project)
}

fn generator(temp_dir: &TempDir, pool: &SqlitePool) -> WikiGenerator {
    let config = Config::load(temp_dir.path()).expect("Failed to load config");
    let processor = Arc::new(DocumentProcessor::new(
        pool.clone(),
        &config,
        None,
        Arc::new(UnavailableGraphStore),
    ));
    let tracker = Arc::new(ProgressTracker::new(pool.clone()));
    WikiGenerator::new(processor, tracker)
}

async fn seed_chunked_document(pool: &SqlitePool, project_id: i64, doc_id: &str, lens: LensType) {
    let doc = NewDocument {
        project_id,
        doc_id: doc_id.to_string(),
        title: doc_id.to_string(),
        source_type: "local_folder".to_string(),
        source_url: None,
        source_meta: serde_json::json!({}),
        raw_text: "Some document text.".to_string(),
        file_type: Some("md".to_string()),
        last_modified: None,
    };
    let chunk = NewDocumentChunk {
        chunk_index: 0,
        text: format!("Content of {doc_id}."),
        embedding: vec![0.0; 4],
        lens_type: lens,
        confidence_score: 0.5,
        recency_score: 0.5,
        source_weight: 0.7,
        lens_weight: 1.0,
        importance_score: 0.5,
        tokens: 3,
        chunk_metadata: serde_json::json!({"start_index": 0, "end_index": 10, "entities": []}),
        is_generated: false,
        generation_status: GenerationStatus::Manual,
    };
    DocumentQueries::upsert_with_chunks(pool, &doc, &[chunk])
        .await
        .expect("Failed to seed document");
}

#[test]
fn slugify_normalizes_input() {
    assert_eq!(slugify("How It Works"), "how-it-works");
    assert_eq!(slugify("GTM"), "gtm");
    assert_eq!(slugify("  --weird__input!!  "), "weird-input");
    assert_eq!(slugify(""), "");
}

#[tokio::test]
async fn generate_wiki_builds_overview_and_sections() {
    let (temp_dir, pool, project) = setup().await;

    seed_chunked_document(&pool, project.id, "arch", LensType::Logic).await;
    seed_chunked_document(&pool, project.id, "guide", LensType::Sop).await;

    let generator = generator(&temp_dir, &pool);
    let pages = generator.generate_wiki(project.id).await.unwrap();

    // Overview plus one section per populated lens.
    assert_eq!(pages.len(), 3);

    let overview = pages.iter().find(|p| p.slug == "overview").unwrap();
    assert!(overview.parent_id.is_none());
    assert!(overview.content.contains("wiki-test"));
    assert!(overview.content.contains("A documentation corpus"));

    let children = children_of(&pages, overview.id);
    assert_eq!(children.len(), 2);
    assert!(children.iter().all(|c| c.parent_id == Some(overview.id)));

    let logic = pages.iter().find(|p| p.lens_type == Some(LensType::Logic)).unwrap();
    assert!(logic.content.contains("Content of arch."));
}

#[tokio::test]
async fn regeneration_updates_pages_in_place() {
    let (temp_dir, pool, project) = setup().await;

    seed_chunked_document(&pool, project.id, "arch", LensType::Logic).await;

    let generator = generator(&temp_dir, &pool);
    let first = generator.generate_wiki(project.id).await.unwrap();
    let second = generator.generate_wiki(project.id).await.unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.id, b.id, "slug {} should keep its page id", a.slug);
    }
}

#[tokio::test]
async fn generate_wiki_records_a_terminal_task() {
    let (temp_dir, pool, project) = setup().await;

    let generator = generator(&temp_dir, &pool);
    generator.generate_wiki(project.id).await.unwrap();

    let tasks = crate::database::queries::TaskQueries::list_by_project(&pool, project.id)
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_type, TaskType::WikiGeneration);
    assert!(tasks[0].is_terminal());
    assert_eq!(tasks[0].progress_percentage, 100.0);
}

#[tokio::test]
async fn missing_project_is_an_error() {
    let (temp_dir, pool, _project) = setup().await;
    let generator = generator(&temp_dir, &pool);

    assert!(generator.generate_wiki(999).await.is_err());
}

#[tokio::test]
async fn generate_missing_docs_backfills_required_lenses() {
    let (temp_dir, pool, project) = setup().await;
    let generator = generator(&temp_dir, &pool);

    let created = generator
        .generate_missing_docs(project.id, &temp_dir.path().join("missing.yml"))
        .await
        .unwrap();

    // LOGIC is short 10 documents but only 5 topics can be named; SOP 5,
    // GTM 3. CL is not required.
    assert_eq!(created, 13);

    let documents = DocumentQueries::list_by_project(&pool, project.id).await.unwrap();
    assert_eq!(documents.len(), 13);
    assert!(documents.iter().all(|d| d.source_type == "auto_generated"));

    // Drafts flow through the normal pipeline: their chunks are marked
    // generated with draft status.
    let chunks = crate::database::queries::ChunkQueries::list_by_document(&pool, documents[0].id)
        .await
        .unwrap();
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|c| c.is_generated));
    assert!(chunks
        .iter()
        .all(|c| c.generation_status == GenerationStatus::Draft));
}

#[tokio::test]
async fn generated_docs_are_idempotent_per_topic() {
    let (temp_dir, pool, project) = setup().await;
    let generator = generator(&temp_dir, &pool);
    let requirements = temp_dir.path().join("missing.yml");

    generator.generate_missing_docs(project.id, &requirements).await.unwrap();
    generator.generate_missing_docs(project.id, &requirements).await.unwrap();

    // Topic-derived doc_ids mean a second run replaces rather than
    // duplicates.
    let documents = DocumentQueries::list_by_project(&pool, project.id).await.unwrap();
    assert_eq!(documents.len(), 13);
}

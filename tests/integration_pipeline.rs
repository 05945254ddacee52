#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

use std::fs;

use docharvester::config::Config;
use docharvester::coverage::CoverageEngine;
use docharvester::database::Database;
use docharvester::database::models::{CoverageBucket, NewProject};
use docharvester::database::queries::{ChunkQueries, DocumentQueries, ProjectQueries};
use docharvester::ingest::IngestionOrchestrator;
use docharvester::processing::classifier::LensType;
use tempfile::TempDir;

/// Base directory with a config tuned for small chunks so a single
/// document produces several of them.
fn setup_base_dir() -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[chunking]\nchunk_size = 100\nchunk_overlap = 20\n\n[embedding]\ndimension = 256\n",
    )
    .expect("Failed to write config");
    temp_dir
}

fn corpus_text() -> String {
    let sentence = "The system architecture uses a modular design where each database \
                    schema component implements one function of the api.";
    let mut text = String::new();
    for _ in 0..30 {
        text.push_str(sentence);
        text.push(' ');
    }
    text
}

async fn seed_project(database: &Database, base_dir: &TempDir) -> i64 {
    let project = ProjectQueries::create(
        database.pool(),
        NewProject {
            name: "pipeline-test".to_string(),
            description: Some("End to end corpus".to_string()),
            ..Default::default()
        },
    )
    .await
    .expect("Failed to create project");

    let uploads = base_dir.path().join("uploads").join(project.id.to_string());
    fs::create_dir_all(&uploads).expect("Failed to create uploads dir");
    fs::write(uploads.join("handbook.md"), corpus_text()).expect("Failed to write document");

    project.id
}

#[tokio::test]
async fn full_pipeline_from_upload_to_coverage() {
    let base_dir = setup_base_dir();
    let config = Config::load(base_dir.path()).expect("Failed to load config");
    let database = Database::initialize_from_base_dir(base_dir.path())
        .await
        .expect("Failed to initialize database");

    let project_id = seed_project(&database, &base_dir).await;

    let orchestrator = IngestionOrchestrator::from_config(database.pool().clone(), &config, None);
    let summary = orchestrator
        .ingest_project(project_id)
        .await
        .expect("Ingestion failed");

    assert_eq!(summary.documents_processed, 1);
    assert_eq!(summary.errors, 0);

    let documents = DocumentQueries::list_by_project(database.pool(), project_id)
        .await
        .expect("Failed to list documents");
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].title, "handbook");
    assert_eq!(documents[0].source_type, "local_folder");

    let chunks = ChunkQueries::list_by_document(database.pool(), documents[0].id)
        .await
        .expect("Failed to list chunks");

    // ~500 tokens against a 100-token budget yields several chunks.
    assert!(chunks.len() >= 4, "expected multiple chunks, got {}", chunks.len());

    let mut previous_end = 0i64;
    for (index, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, index as i64);

        // Chunks are contiguous with backward overlap: each one starts at
        // or before where the previous one ended.
        let start = chunk.chunk_metadata.0["start_index"].as_i64().expect("start_index");
        let end = chunk.chunk_metadata.0["end_index"].as_i64().expect("end_index");
        assert!(end > start);
        if index == 0 {
            assert_eq!(start, 0);
        } else {
            assert!(start <= previous_end, "chunk {index} leaves a gap");
            assert!(end > previous_end);
        }
        previous_end = end;

        // The corpus is dense with LOGIC vocabulary.
        assert_eq!(chunk.lens_type, LensType::Logic);
        assert!((0.3..=0.9).contains(&chunk.confidence_score));

        // Configured dimension, unit length fallback vectors.
        assert_eq!(chunk.embedding.0.len(), 256);
        let norm: f32 = chunk.embedding.0.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);

        // Freshly written file, local folder source, LOGIC lens.
        assert_eq!(chunk.recency_score, 1.0);
        assert_eq!(chunk.source_weight, 0.7);
        assert_eq!(chunk.lens_weight, 1.0);
        let expected = 0.3 * chunk.recency_score + 0.3 * chunk.source_weight + 0.4 * chunk.lens_weight;
        assert!((chunk.importance_score - expected).abs() < 1e-9);
    }

    // Coverage: one LOGIC document against a minimum of ten, no entities.
    let engine = CoverageEngine::new(database.pool().clone());
    let report = engine
        .check_coverage(project_id, &base_dir.path().join("coverage.yml"))
        .await
        .expect("Coverage check failed");

    let logic = report
        .lenses
        .iter()
        .find(|l| l.lens_type == LensType::Logic)
        .expect("LOGIC lens missing from report");
    assert_eq!(logic.document_count, 1);
    assert_eq!(logic.coverage_percentage, 10.0);
    assert_eq!(logic.status, CoverageBucket::Poor);
    assert_eq!(logic.missing_topics.len(), 5);

    let analysis = engine.gap_analysis(project_id).await.expect("Gap analysis failed");
    // LOGIC 10%, SOP 0%, GTM 0%; CL is optional and excluded from the mean.
    assert!((analysis.overall_coverage - 10.0 / 3.0).abs() < 1e-9);

    let logic_gap = analysis
        .gaps
        .iter()
        .find(|g| g.lens_type == LensType::Logic)
        .expect("LOGIC gap missing");
    assert_eq!(logic_gap.missing_topics.len(), 5);
    assert!(logic_gap.existing_topics.is_empty());
}

#[tokio::test]
async fn reingestion_is_idempotent_and_tracks_edits() {
    let base_dir = setup_base_dir();
    let config = Config::load(base_dir.path()).expect("Failed to load config");
    let database = Database::initialize_from_base_dir(base_dir.path())
        .await
        .expect("Failed to initialize database");

    let project_id = seed_project(&database, &base_dir).await;

    let orchestrator = IngestionOrchestrator::from_config(database.pool().clone(), &config, None);
    orchestrator.ingest_project(project_id).await.expect("First ingestion failed");
    orchestrator.ingest_project(project_id).await.expect("Second ingestion failed");

    let documents = DocumentQueries::list_by_project(database.pool(), project_id)
        .await
        .expect("Failed to list documents");
    assert_eq!(documents.len(), 1, "re-ingestion must not duplicate documents");
    let first_id = documents[0].id;

    // Edit the source file; the next run replaces content under the same row.
    let uploads = base_dir.path().join("uploads").join(project_id.to_string());
    fs::write(
        uploads.join("handbook.md"),
        "Step 1: open the setup guide. Step 2: configure the user account and click save.",
    )
    .expect("Failed to rewrite document");

    orchestrator.ingest_project(project_id).await.expect("Third ingestion failed");

    let documents = DocumentQueries::list_by_project(database.pool(), project_id)
        .await
        .expect("Failed to list documents");
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].id, first_id);
    assert!(documents[0].raw_text.contains("setup guide"));

    let chunks = ChunkQueries::list_by_document(database.pool(), first_id)
        .await
        .expect("Failed to list chunks");
    assert_eq!(chunks.len(), 1, "short document should collapse to one chunk");
    assert_eq!(chunks[0].lens_type, LensType::Sop);
}

use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

use super::*;
use crate::database::models::NewProject;
use crate::database::queries::ProjectQueries;

async fn setup() -> (TempDir, SqlitePool, i64) {
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
            name: "tracker-test".to_string(),
            ..Default::default()
        },
    )
    .await
    .expect("Failed to create project");

    (temp_dir, pool, project.id)
}

#[test]
fn step_duration_totals() {
    assert_eq!(estimated_duration(TaskType::WikiGeneration), 140);
    assert_eq!(estimated_duration(TaskType::EntityExtraction), 100);
    assert_eq!(estimated_duration(TaskType::KnowledgeGraphRefresh), 100);
    assert_eq!(estimated_duration(TaskType::Ingestion), 120);
}

#[test]
fn remaining_time_extrapolation() {
    // Halfway through after 30s means about 30s left.
    assert_eq!(remaining_seconds(30.0, 50.0, 120), 30);
    // 25% done after 10s: three quarters of the pace remain.
    assert_eq!(remaining_seconds(10.0, 25.0, 120), 30);
    // No progress yet: the estimate stands.
    assert_eq!(remaining_seconds(5.0, 0.0, 120), 120);
    // Finished work never reports negative time.
    assert_eq!(remaining_seconds(30.0, 100.0, 120), 0);
}

#[tokio::test]
async fn create_initializes_pending_task() {
    let (_temp_dir, pool, project_id) = setup().await;
    let tracker = ProgressTracker::new(pool);

    let task = tracker.create(TaskType::WikiGeneration, project_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.progress_percentage, 0.0);
    assert_eq!(task.current_step, "initializing");
    assert_eq!(task.estimated_duration_seconds, 140);
    assert_eq!(task.remaining_time_seconds, 140);
    assert!(task.started_at.is_none());
}

#[tokio::test]
async fn progress_updates_transition_to_running() {
    let (_temp_dir, pool, project_id) = setup().await;
    let tracker = ProgressTracker::new(pool);

    let task = tracker.create(TaskType::Ingestion, project_id).await.unwrap();
    let updated = tracker
        .update_progress(task.id, 40.0, "processing_documents")
        .await
        .unwrap();
    assert!(updated);

    let current = tracker.get(task.id).await.unwrap().unwrap();
    assert_eq!(current.status, TaskStatus::Running);
    assert_eq!(current.progress_percentage, 40.0);
    assert_eq!(current.current_step, "processing_documents");
    assert!(current.started_at.is_some());
}

#[tokio::test]
async fn progress_is_clamped_to_valid_range() {
    let (_temp_dir, pool, project_id) = setup().await;
    let tracker = ProgressTracker::new(pool);

    let task = tracker.create(TaskType::Ingestion, project_id).await.unwrap();
    tracker.update_progress(task.id, 250.0, "step").await.unwrap();

    let current = tracker.get(task.id).await.unwrap().unwrap();
    assert_eq!(current.progress_percentage, 100.0);
}

#[tokio::test]
async fn complete_sets_terminal_state_and_result() {
    let (_temp_dir, pool, project_id) = setup().await;
    let tracker = ProgressTracker::new(pool);

    let task = tracker.create(TaskType::Ingestion, project_id).await.unwrap();
    let completed = tracker
        .complete(task.id, Some(serde_json::json!({"documents_processed": 2})))
        .await
        .unwrap();
    assert!(completed);

    let current = tracker.get(task.id).await.unwrap().unwrap();
    assert_eq!(current.status, TaskStatus::Completed);
    assert_eq!(current.progress_percentage, 100.0);
    assert_eq!(current.remaining_time_seconds, 0);
    assert!(current.completed_at.is_some());
    assert_eq!(
        current.result_data.unwrap().0["documents_processed"],
        2
    );
}

#[tokio::test]
async fn terminal_tasks_ignore_late_updates() {
    let (_temp_dir, pool, project_id) = setup().await;
    let tracker = ProgressTracker::new(pool);

    let task = tracker.create(TaskType::Ingestion, project_id).await.unwrap();
    tracker.complete(task.id, None).await.unwrap();

    // A straggler update after completion is a no-op.
    assert!(!tracker.update_progress(task.id, 10.0, "late").await.unwrap());
    assert!(!tracker.complete(task.id, None).await.unwrap());
    assert!(!tracker.fail(task.id, "late failure").await.unwrap());

    let current = tracker.get(task.id).await.unwrap().unwrap();
    assert_eq!(current.status, TaskStatus::Completed);
    assert_eq!(current.progress_percentage, 100.0);
    assert_eq!(current.current_step, "completed");
    assert!(current.error_message.is_none());
}

#[tokio::test]
async fn cancel_marks_task_failed() {
    let (_temp_dir, pool, project_id) = setup().await;
    let tracker = ProgressTracker::new(pool);

    let task = tracker.create(TaskType::WikiGeneration, project_id).await.unwrap();
    tracker.update_progress(task.id, 30.0, "creating_pages").await.unwrap();

    assert!(tracker.cancel(task.id).await.unwrap());

    let current = tracker.get(task.id).await.unwrap().unwrap();
    assert_eq!(current.status, TaskStatus::Failed);
    assert_eq!(current.error_message.as_deref(), Some("cancelled by user"));

    // Cancelling again is a no-op.
    assert!(!tracker.cancel(task.id).await.unwrap());
}

#[tokio::test]
async fn list_active_excludes_terminal_tasks() {
    let (_temp_dir, pool, project_id) = setup().await;
    let tracker = ProgressTracker::new(pool);

    let first = tracker.create(TaskType::Ingestion, project_id).await.unwrap();
    let second = tracker.create(TaskType::WikiGeneration, project_id).await.unwrap();
    tracker.complete(first.id, None).await.unwrap();

    let active = tracker.list_active(project_id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.id);

    let all = tracker.list_all(project_id).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn unknown_task_is_an_error() {
    let (_temp_dir, pool, _project_id) = setup().await;
    let tracker = ProgressTracker::new(pool);

    assert!(tracker.update_progress(999, 10.0, "step").await.is_err());
    assert!(tracker.complete(999, None).await.is_err());
}

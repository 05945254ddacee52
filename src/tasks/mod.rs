#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::database::models::{ProcessingTask, TaskStatus, TaskType, TaskUpdate};
use crate::database::queries::TaskQueries;

/// Named steps and their expected durations in seconds, used to seed the
/// overall estimate for a task type.
pub fn step_durations(task_type: TaskType) -> &'static [(&'static str, u64)] {
    match task_type {
        TaskType::WikiGeneration => &[
            ("analyzing_project", 15),
            ("extracting_entities", 30),
            ("generating_structure", 25),
            ("creating_pages", 60),
            ("finalizing", 10),
        ],
        TaskType::EntityExtraction => &[
            ("initializing", 5),
            ("processing_chunks", 45),
            ("storing_entities", 20),
            ("creating_relationships", 30),
        ],
        TaskType::KnowledgeGraphRefresh => &[
            ("analyzing_documents", 20),
            ("extracting_entities", 40),
            ("mapping_relationships", 30),
            ("updating_graph", 10),
        ],
        TaskType::Ingestion => &[],
    }
}

const DEFAULT_ESTIMATE_SECONDS: u64 = 120;

pub fn estimated_duration(task_type: TaskType) -> u64 {
    let total: u64 = step_durations(task_type).iter().map(|(_, secs)| secs).sum();
    if total == 0 { DEFAULT_ESTIMATE_SECONDS } else { total }
}

/// Tracks long-running background work. Every state transition goes
/// through the database, which is the source of truth; the in-memory
/// start-instant map only sharpens elapsed-time readings and can be lost
/// (on restart) without corrupting any task.
pub struct ProgressTracker {
    pool: SqlitePool,
    started: Mutex<HashMap<i64, Instant>>,
}

impl ProgressTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            started: Mutex::new(HashMap::new()),
        }
    }

    /// Create a new task in `pending` state with a seeded duration
    /// estimate.
    pub async fn create(&self, task_type: TaskType, project_id: i64) -> Result<ProcessingTask> {
        let estimate = estimated_duration(task_type) as i64;
        let task = TaskQueries::create(&self.pool, task_type, project_id, estimate).await?;

        if let Ok(mut started) = self.started.lock() {
            started.insert(task.id, Instant::now());
        }

        debug!(
            "Created {} task {} for project {} (estimate {}s)",
            task_type, task.id, project_id, estimate
        );
        Ok(task)
    }

    /// Advance a task. Returns Ok(false) without touching the row when the
    /// task is already terminal; late updates from stragglers must not
    /// resurrect finished work.
    pub async fn update_progress(
        &self,
        task_id: i64,
        percent: f64,
        current_step: &str,
    ) -> Result<bool> {
        let Some(task) = TaskQueries::get_by_id(&self.pool, task_id).await? else {
            anyhow::bail!("Task {} not found", task_id);
        };

        if task.is_terminal() {
            warn!(
                "Ignoring progress update for terminal task {} ({})",
                task_id, task.status
            );
            return Ok(false);
        }

        let percent = percent.clamp(0.0, 100.0);
        let elapsed = self.elapsed_seconds(&task);
        let remaining = remaining_seconds(elapsed, percent, task.estimated_duration_seconds);

        let update = TaskUpdate {
            status: Some(TaskStatus::Running),
            progress_percentage: Some(percent),
            current_step: Some(current_step.to_string()),
            elapsed_time_seconds: Some(elapsed),
            remaining_time_seconds: Some(remaining),
            started_at: if task.started_at.is_none() {
                Some(Utc::now())
            } else {
                None
            },
            ..Default::default()
        };

        TaskQueries::update(&self.pool, task_id, update)
            .await
            .context("Failed to persist progress update")?;
        Ok(true)
    }

    /// Mark a task completed. Terminal tasks are left untouched.
    pub async fn complete(&self, task_id: i64, result_data: Option<Value>) -> Result<bool> {
        let Some(task) = TaskQueries::get_by_id(&self.pool, task_id).await? else {
            anyhow::bail!("Task {} not found", task_id);
        };

        if task.is_terminal() {
            warn!(
                "Ignoring completion for terminal task {} ({})",
                task_id, task.status
            );
            return Ok(false);
        }

        let update = TaskUpdate {
            status: Some(TaskStatus::Completed),
            progress_percentage: Some(100.0),
            current_step: Some("completed".to_string()),
            elapsed_time_seconds: Some(self.elapsed_seconds(&task)),
            remaining_time_seconds: Some(0),
            result_data,
            completed_at: Some(Utc::now()),
            ..Default::default()
        };

        TaskQueries::update(&self.pool, task_id, update)
            .await
            .context("Failed to persist task completion")?;
        self.forget(task_id);
        Ok(true)
    }

    /// Mark a task failed with an error message. Terminal tasks are left
    /// untouched.
    pub async fn fail(&self, task_id: i64, error: &str) -> Result<bool> {
        let Some(task) = TaskQueries::get_by_id(&self.pool, task_id).await? else {
            anyhow::bail!("Task {} not found", task_id);
        };

        if task.is_terminal() {
            warn!(
                "Ignoring failure for terminal task {} ({})",
                task_id, task.status
            );
            return Ok(false);
        }

        let update = TaskUpdate {
            status: Some(TaskStatus::Failed),
            error_message: Some(error.to_string()),
            elapsed_time_seconds: Some(self.elapsed_seconds(&task)),
            remaining_time_seconds: Some(0),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };

        TaskQueries::update(&self.pool, task_id, update)
            .await
            .context("Failed to persist task failure")?;
        self.forget(task_id);
        Ok(true)
    }

    /// User-initiated cancellation, recorded as a failure.
    pub async fn cancel(&self, task_id: i64) -> Result<bool> {
        self.fail(task_id, "cancelled by user").await
    }

    pub async fn get(&self, task_id: i64) -> Result<Option<ProcessingTask>> {
        TaskQueries::get_by_id(&self.pool, task_id).await
    }

    /// Pending and running tasks for a project, newest first.
    pub async fn list_active(&self, project_id: i64) -> Result<Vec<ProcessingTask>> {
        TaskQueries::list_active(&self.pool, project_id).await
    }

    pub async fn list_all(&self, project_id: i64) -> Result<Vec<ProcessingTask>> {
        TaskQueries::list_by_project(&self.pool, project_id).await
    }

    fn elapsed_seconds(&self, task: &ProcessingTask) -> f64 {
        if let Ok(started) = self.started.lock() {
            if let Some(instant) = started.get(&task.id) {
                return instant.elapsed().as_secs_f64();
            }
        }

        // After a restart the instant is gone; fall back to wall-clock
        // time since the task started (or was created).
        let reference = task.started_at.unwrap_or(task.created_at);
        (Utc::now() - reference).num_milliseconds().max(0) as f64 / 1000.0
    }

    fn forget(&self, task_id: i64) {
        if let Ok(mut started) = self.started.lock() {
            started.remove(&task_id);
        }
    }
}

/// Linear extrapolation from progress so far. With no progress yet the
/// original estimate stands.
fn remaining_seconds(elapsed: f64, percent: f64, estimate: i64) -> i64 {
    if percent > 0.0 {
        let remaining = elapsed * (100.0 / percent - 1.0);
        remaining.max(0.0).round() as i64
    } else {
        estimate.max(0)
    }
}

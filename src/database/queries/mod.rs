
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::types::Json;
use tracing::debug;

use super::models::*;
use crate::processing::classifier::LensType;

const DOCUMENT_COLUMNS: &str = "id, project_id, doc_id, title, source_type, source_url, \
     source_meta, raw_text, file_type, last_modified, created_at, updated_at";

const CHUNK_COLUMNS: &str = "id, document_id, chunk_index, text, embedding, lens_type, \
     confidence_score, recency_score, source_weight, lens_weight, importance_score, tokens, \
     chunk_metadata, is_generated, generation_status, created_at";

const TASK_COLUMNS: &str = "id, task_type, status, progress_percentage, current_step, \
     total_steps, completed_steps, estimated_duration_seconds, elapsed_time_seconds, \
     remaining_time_seconds, project_id, result_data, error_message, started_at, completed_at, \
     created_at, updated_at";

pub struct ProjectQueries;

impl ProjectQueries {
    pub async fn create(pool: &SqlitePool, new_project: NewProject) -> Result<Project> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO projects (name, description, tags, owners, connector_configs, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&new_project.name)
        .bind(&new_project.description)
        .bind(Json(&new_project.tags))
        .bind(Json(&new_project.owners))
        .bind(Json(&new_project.connector_configs))
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create project")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created project"))
    }

    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Project>> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get project by id")
    }

    pub async fn get_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Project>> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await
            .context("Failed to get project by name")
    }

    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Project>> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
            .context("Failed to list projects")
    }

    pub async fn update(pool: &SqlitePool, id: i64, update: ProjectUpdate) -> Result<Option<Project>> {
        let mut query_parts = Vec::new();
        let mut query_values = Vec::new();

        if let Some(description) = update.description {
            query_parts.push("description = ?");
            query_values.push(description);
        }

        if let Some(tags) = update.tags {
            query_parts.push("tags = ?");
            query_values.push(serde_json::to_string(&tags)?);
        }

        if let Some(owners) = update.owners {
            query_parts.push("owners = ?");
            query_values.push(serde_json::to_string(&owners)?);
        }

        if let Some(configs) = update.connector_configs {
            query_parts.push("connector_configs = ?");
            query_values.push(serde_json::to_string(&configs)?);
        }

        if query_parts.is_empty() {
            return Self::get_by_id(pool, id).await;
        }

        query_parts.push("updated_at = ?");
        query_values.push(Utc::now().to_rfc3339());

        let query_str = format!("UPDATE projects SET {} WHERE id = ?", query_parts.join(", "));

        let mut query = sqlx::query(&query_str);
        for value in query_values {
            query = query.bind(value);
        }
        query = query.bind(id);

        query
            .execute(pool)
            .await
            .context("Failed to update project")?;

        Self::get_by_id(pool, id).await
    }

    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete project")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_statistics(pool: &SqlitePool, id: i64) -> Result<Option<ProjectStatistics>> {
        let Some(project) = Self::get_by_id(pool, id).await? else {
            return Ok(None);
        };

        let document_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE project_id = ?")
                .bind(id)
                .fetch_one(pool)
                .await
                .context("Failed to count documents")?;

        let chunk_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM document_chunks c \
             JOIN documents d ON d.id = c.document_id WHERE d.project_id = ?",
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .context("Failed to count chunks")?;

        let active_tasks: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM processing_tasks \
             WHERE project_id = ? AND status IN ('pending', 'running')",
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .context("Failed to count active tasks")?;

        Ok(Some(ProjectStatistics {
            project,
            document_count,
            chunk_count,
            active_tasks,
        }))
    }
}

pub struct DocumentQueries;

impl DocumentQueries {
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Document>> {
        sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get document by id")
    }

    pub async fn get_by_doc_id(pool: &SqlitePool, doc_id: &str) -> Result<Option<Document>> {
        sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE doc_id = ?"
        ))
        .bind(doc_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get document by doc_id")
    }

    pub async fn list_by_project(pool: &SqlitePool, project_id: i64) -> Result<Vec<Document>> {
        sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE project_id = ? ORDER BY title"
        ))
        .bind(project_id)
        .fetch_all(pool)
        .await
        .context("Failed to list documents by project")
    }

    /// Insert a document and its chunks, or replace an existing document's
    /// content and chunks, in a single transaction. Partial writes never
    /// become visible.
    pub async fn upsert_with_chunks(
        pool: &SqlitePool,
        new_doc: &NewDocument,
        chunks: &[NewDocumentChunk],
    ) -> Result<(i64, usize)> {
        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin document upsert transaction")?;

        let now = Utc::now();

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM documents WHERE doc_id = ?")
                .bind(&new_doc.doc_id)
                .fetch_optional(&mut *transaction)
                .await
                .context("Failed to look up document by doc_id")?;

        let document_id = if let Some(id) = existing {
            sqlx::query(
                "UPDATE documents SET title = ?, source_url = ?, source_meta = ?, raw_text = ?, \
                 file_type = ?, last_modified = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&new_doc.title)
            .bind(&new_doc.source_url)
            .bind(Json(&new_doc.source_meta))
            .bind(&new_doc.raw_text)
            .bind(&new_doc.file_type)
            .bind(new_doc.last_modified)
            .bind(now)
            .bind(id)
            .execute(&mut *transaction)
            .await
            .context("Failed to update existing document")?;

            // Stale chunks must not survive a content change.
            sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
                .bind(id)
                .execute(&mut *transaction)
                .await
                .context("Failed to delete stale chunks")?;

            id
        } else {
            sqlx::query(
                "INSERT INTO documents (project_id, doc_id, title, source_type, source_url, \
                 source_meta, raw_text, file_type, last_modified, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(new_doc.project_id)
            .bind(&new_doc.doc_id)
            .bind(&new_doc.title)
            .bind(&new_doc.source_type)
            .bind(&new_doc.source_url)
            .bind(Json(&new_doc.source_meta))
            .bind(&new_doc.raw_text)
            .bind(&new_doc.file_type)
            .bind(new_doc.last_modified)
            .bind(now)
            .bind(now)
            .execute(&mut *transaction)
            .await
            .context("Failed to insert document")?
            .last_insert_rowid()
        };

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO document_chunks (document_id, chunk_index, text, embedding, \
                 lens_type, confidence_score, recency_score, source_weight, lens_weight, \
                 importance_score, tokens, chunk_metadata, is_generated, generation_status, \
                 created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(Json(&chunk.embedding))
            .bind(chunk.lens_type)
            .bind(chunk.confidence_score)
            .bind(chunk.recency_score)
            .bind(chunk.source_weight)
            .bind(chunk.lens_weight)
            .bind(chunk.importance_score)
            .bind(chunk.tokens)
            .bind(Json(&chunk.chunk_metadata))
            .bind(chunk.is_generated)
            .bind(chunk.generation_status)
            .bind(now)
            .execute(&mut *transaction)
            .await
            .context("Failed to insert document chunk")?;
        }

        transaction
            .commit()
            .await
            .context("Failed to commit document upsert transaction")?;

        debug!(
            "Stored document {} with {} chunks",
            new_doc.doc_id,
            chunks.len()
        );
        Ok((document_id, chunks.len()))
    }

    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete document")?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    pub async fn list_by_document(pool: &SqlitePool, document_id: i64) -> Result<Vec<DocumentChunk>> {
        sqlx::query_as::<_, DocumentChunk>(&format!(
            "SELECT {CHUNK_COLUMNS} FROM document_chunks \
             WHERE document_id = ? ORDER BY chunk_index"
        ))
        .bind(document_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chunks by document")
    }

    pub async fn list_by_project_and_lens(
        pool: &SqlitePool,
        project_id: i64,
        lens_type: LensType,
    ) -> Result<Vec<DocumentChunk>> {
        sqlx::query_as::<_, DocumentChunk>(
            "SELECT c.* FROM document_chunks c \
             JOIN documents d ON d.id = c.document_id \
             WHERE d.project_id = ? AND c.lens_type = ? \
             ORDER BY c.importance_score DESC",
        )
        .bind(project_id)
        .bind(lens_type)
        .fetch_all(pool)
        .await
        .context("Failed to list chunks by project and lens")
    }

    pub async fn count_by_project(pool: &SqlitePool, project_id: i64) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM document_chunks c \
             JOIN documents d ON d.id = c.document_id WHERE d.project_id = ?",
        )
        .bind(project_id)
        .fetch_one(pool)
        .await
        .context("Failed to count chunks by project")
    }

    /// Per-lens tallies feeding the coverage engine: distinct documents,
    /// chunks, and chunks carrying at least one extracted entity.
    pub async fn lens_statistics(
        pool: &SqlitePool,
        project_id: i64,
        lens_type: LensType,
    ) -> Result<LensStatistics> {
        let row: (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(DISTINCT c.document_id), \
                    COUNT(*), \
                    COALESCE(SUM(CASE WHEN json_array_length(json_extract(c.chunk_metadata, '$.entities')) > 0 \
                        THEN 1 ELSE 0 END), 0) \
             FROM document_chunks c \
             JOIN documents d ON d.id = c.document_id \
             WHERE d.project_id = ? AND c.lens_type = ?",
        )
        .bind(project_id)
        .bind(lens_type)
        .fetch_one(pool)
        .await
        .context("Failed to get lens statistics")?;

        Ok(LensStatistics {
            document_count: row.0,
            chunk_count: row.1,
            chunks_with_entities: row.2,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LensStatistics {
    pub document_count: i64,
    pub chunk_count: i64,
    pub chunks_with_entities: i64,
}

pub struct CoverageQueries;

impl CoverageQueries {
    pub async fn upsert_requirement(
        pool: &SqlitePool,
        project_id: i64,
        lens_type: LensType,
        is_required: bool,
        min_documents: i64,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO coverage_requirements \
             (project_id, lens_type, is_required, min_documents, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(project_id, lens_type) DO UPDATE SET \
             is_required = excluded.is_required, min_documents = excluded.min_documents, \
             updated_at = excluded.updated_at",
        )
        .bind(project_id)
        .bind(lens_type)
        .bind(is_required)
        .bind(min_documents)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to upsert coverage requirement")?;

        Ok(())
    }

    pub async fn get_requirements(
        pool: &SqlitePool,
        project_id: i64,
    ) -> Result<Vec<CoverageRequirement>> {
        sqlx::query_as::<_, CoverageRequirement>(
            "SELECT * FROM coverage_requirements WHERE project_id = ? ORDER BY lens_type",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
        .context("Failed to get coverage requirements")
    }

    pub async fn upsert_status(
        pool: &SqlitePool,
        project_id: i64,
        lens_type: LensType,
        status: CoverageBucket,
        document_count: i64,
        chunk_count: i64,
        coverage_percentage: f64,
        missing_topics: &[String],
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO coverage_status \
             (project_id, lens_type, status, document_count, chunk_count, coverage_percentage, \
              missing_topics, last_checked) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(project_id, lens_type) DO UPDATE SET \
             status = excluded.status, document_count = excluded.document_count, \
             chunk_count = excluded.chunk_count, \
             coverage_percentage = excluded.coverage_percentage, \
             missing_topics = excluded.missing_topics, last_checked = excluded.last_checked",
        )
        .bind(project_id)
        .bind(lens_type)
        .bind(status)
        .bind(document_count)
        .bind(chunk_count)
        .bind(coverage_percentage)
        .bind(Json(missing_topics))
        .bind(Utc::now())
        .execute(pool)
        .await
        .context("Failed to upsert coverage status")?;

        Ok(())
    }

    pub async fn get_status(
        pool: &SqlitePool,
        project_id: i64,
    ) -> Result<Vec<CoverageStatusRow>> {
        sqlx::query_as::<_, CoverageStatusRow>(
            "SELECT * FROM coverage_status WHERE project_id = ? ORDER BY lens_type",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
        .context("Failed to get coverage status")
    }
}

pub struct TaskQueries;

impl TaskQueries {
    pub async fn create(
        pool: &SqlitePool,
        task_type: TaskType,
        project_id: i64,
        estimated_duration_seconds: i64,
    ) -> Result<ProcessingTask> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO processing_tasks \
             (task_type, status, progress_percentage, current_step, estimated_duration_seconds, \
              remaining_time_seconds, project_id, created_at, updated_at) \
             VALUES (?, 'pending', 0.0, 'initializing', ?, ?, ?, ?, ?)",
        )
        .bind(task_type)
        .bind(estimated_duration_seconds)
        .bind(estimated_duration_seconds)
        .bind(project_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create processing task")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created task"))
    }

    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<ProcessingTask>> {
        sqlx::query_as::<_, ProcessingTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM processing_tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get task by id")
    }

    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        update: TaskUpdate,
    ) -> Result<Option<ProcessingTask>> {
        let mut query_parts = Vec::new();
        let mut query_values = Vec::new();

        if let Some(status) = update.status {
            query_parts.push("status = ?");
            query_values.push(status.to_string());
        }

        if let Some(progress) = update.progress_percentage {
            query_parts.push("progress_percentage = ?");
            query_values.push(progress.to_string());
        }

        if let Some(step) = update.current_step {
            query_parts.push("current_step = ?");
            query_values.push(step);
        }

        if let Some(completed) = update.completed_steps {
            query_parts.push("completed_steps = ?");
            query_values.push(completed.to_string());
        }

        if let Some(elapsed) = update.elapsed_time_seconds {
            query_parts.push("elapsed_time_seconds = ?");
            query_values.push(elapsed.to_string());
        }

        if let Some(remaining) = update.remaining_time_seconds {
            query_parts.push("remaining_time_seconds = ?");
            query_values.push(remaining.to_string());
        }

        if let Some(result_data) = update.result_data {
            query_parts.push("result_data = ?");
            query_values.push(serde_json::to_string(&result_data)?);
        }

        if let Some(error) = update.error_message {
            query_parts.push("error_message = ?");
            query_values.push(error);
        }

        if let Some(started) = update.started_at {
            query_parts.push("started_at = ?");
            query_values.push(started.to_rfc3339());
        }

        if let Some(completed) = update.completed_at {
            query_parts.push("completed_at = ?");
            query_values.push(completed.to_rfc3339());
        }

        if query_parts.is_empty() {
            return Self::get_by_id(pool, id).await;
        }

        query_parts.push("updated_at = ?");
        query_values.push(Utc::now().to_rfc3339());

        let query_str = format!(
            "UPDATE processing_tasks SET {} WHERE id = ?",
            query_parts.join(", ")
        );

        let mut query = sqlx::query(&query_str);
        for value in query_values {
            query = query.bind(value);
        }
        query = query.bind(id);

        query.execute(pool).await.context("Failed to update task")?;

        Self::get_by_id(pool, id).await
    }

    pub async fn list_active(pool: &SqlitePool, project_id: i64) -> Result<Vec<ProcessingTask>> {
        sqlx::query_as::<_, ProcessingTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM processing_tasks \
             WHERE project_id = ? AND status IN ('pending', 'running') \
             ORDER BY created_at DESC"
        ))
        .bind(project_id)
        .fetch_all(pool)
        .await
        .context("Failed to list active tasks")
    }

    pub async fn list_by_project(pool: &SqlitePool, project_id: i64) -> Result<Vec<ProcessingTask>> {
        sqlx::query_as::<_, ProcessingTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM processing_tasks \
             WHERE project_id = ? ORDER BY created_at DESC"
        ))
        .bind(project_id)
        .fetch_all(pool)
        .await
        .context("Failed to list tasks by project")
    }
}

pub struct WikiQueries;

impl WikiQueries {
    pub async fn upsert_page(pool: &SqlitePool, page: &NewWikiPage) -> Result<WikiPage> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO wiki_pages \
             (project_id, slug, title, content, lens_type, parent_id, sort_order, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(project_id, slug) DO UPDATE SET \
             title = excluded.title, content = excluded.content, \
             lens_type = excluded.lens_type, parent_id = excluded.parent_id, \
             sort_order = excluded.sort_order, updated_at = excluded.updated_at",
        )
        .bind(page.project_id)
        .bind(&page.slug)
        .bind(&page.title)
        .bind(&page.content)
        .bind(page.lens_type)
        .bind(page.parent_id)
        .bind(page.sort_order)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to upsert wiki page")?;

        Self::get_by_slug(pool, page.project_id, &page.slug)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve upserted wiki page"))
    }

    pub async fn get_by_slug(
        pool: &SqlitePool,
        project_id: i64,
        slug: &str,
    ) -> Result<Option<WikiPage>> {
        sqlx::query_as::<_, WikiPage>(
            "SELECT * FROM wiki_pages WHERE project_id = ? AND slug = ?",
        )
        .bind(project_id)
        .bind(slug)
        .fetch_optional(pool)
        .await
        .context("Failed to get wiki page by slug")
    }

    pub async fn list_by_project(pool: &SqlitePool, project_id: i64) -> Result<Vec<WikiPage>> {
        sqlx::query_as::<_, WikiPage>(
            "SELECT * FROM wiki_pages WHERE project_id = ? ORDER BY sort_order, slug",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
        .context("Failed to list wiki pages")
    }

    pub async fn delete_by_project(pool: &SqlitePool, project_id: i64) -> Result<usize> {
        let result = sqlx::query("DELETE FROM wiki_pages WHERE project_id = ?")
            .bind(project_id)
            .execute(pool)
            .await
            .context("Failed to delete wiki pages")?;

        Ok(result.rows_affected() as usize)
    }
}

pub struct SettingsQueries;

impl SettingsQueries {
    pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM app_settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await
            .context("Failed to get setting")
    }

    pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO app_settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await
        .context("Failed to set setting")?;

        Ok(())
    }

    pub async fn all(pool: &SqlitePool) -> Result<Vec<(String, String)>> {
        sqlx::query_as("SELECT key, value FROM app_settings ORDER BY key")
            .fetch_all(pool)
            .await
            .context("Failed to list settings")
    }
}


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, Type};

use crate::processing::classifier::LensType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub tags: Json<Vec<String>>,
    pub owners: Json<Vec<String>>,
    /// Connector name -> connector-specific settings, e.g.
    /// `{"local_folder": {"path": "/srv/docs"}}`.
    pub connector_configs: Json<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub owners: Vec<String>,
    pub connector_configs: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProjectUpdate {
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub owners: Option<Vec<String>>,
    pub connector_configs: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: i64,
    pub project_id: i64,
    /// Stable content address from the connector, unique across projects.
    pub doc_id: String,
    pub title: String,
    pub source_type: String,
    pub source_url: Option<String>,
    pub source_meta: Json<Value>,
    pub raw_text: String,
    pub file_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub project_id: i64,
    pub doc_id: String,
    pub title: String,
    pub source_type: String,
    pub source_url: Option<String>,
    pub source_meta: Value,
    pub raw_text: String,
    pub file_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DocumentChunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Json<Vec<f32>>,
    pub lens_type: LensType,
    pub confidence_score: f64,
    pub recency_score: f64,
    pub source_weight: f64,
    pub lens_weight: f64,
    pub importance_score: f64,
    pub tokens: i64,
    /// Offsets into the source text plus any extracted entities.
    pub chunk_metadata: Json<Value>,
    pub is_generated: bool,
    pub generation_status: GenerationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocumentChunk {
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
    pub lens_type: LensType,
    pub confidence_score: f64,
    pub recency_score: f64,
    pub source_weight: f64,
    pub lens_weight: f64,
    pub importance_score: f64,
    pub tokens: i64,
    pub chunk_metadata: Value,
    pub is_generated: bool,
    pub generation_status: GenerationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type, Default)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    /// Ingested from a real source.
    #[default]
    Manual,
    /// Produced by the gap filler, awaiting review.
    Draft,
    /// Reviewed generated content, kept as part of the corpus.
    Final,
}

impl std::fmt::Display for GenerationStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            GenerationStatus::Manual => write!(f, "manual"),
            GenerationStatus::Draft => write!(f, "draft"),
            GenerationStatus::Final => write!(f, "final"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CoverageRequirement {
    pub id: i64,
    pub project_id: i64,
    pub lens_type: LensType,
    pub is_required: bool,
    pub min_documents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CoverageStatusRow {
    pub id: i64,
    pub project_id: i64,
    pub lens_type: LensType,
    pub status: CoverageBucket,
    pub document_count: i64,
    pub chunk_count: i64,
    pub coverage_percentage: f64,
    pub missing_topics: Json<Vec<String>>,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CoverageBucket {
    Complete,
    Good,
    Partial,
    Poor,
}

impl std::fmt::Display for CoverageBucket {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            CoverageBucket::Complete => write!(f, "complete"),
            CoverageBucket::Good => write!(f, "good"),
            CoverageBucket::Partial => write!(f, "partial"),
            CoverageBucket::Poor => write!(f, "poor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ProcessingTask {
    pub id: i64,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub progress_percentage: f64,
    pub current_step: String,
    pub total_steps: i64,
    pub completed_steps: i64,
    pub estimated_duration_seconds: i64,
    pub elapsed_time_seconds: f64,
    pub remaining_time_seconds: i64,
    pub project_id: i64,
    pub result_data: Option<Json<Value>>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingTask {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Ingestion,
    WikiGeneration,
    EntityExtraction,
    KnowledgeGraphRefresh,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match *self {
            TaskType::Ingestion => "ingestion",
            TaskType::WikiGeneration => "wiki_generation",
            TaskType::EntityExtraction => "entity_extraction",
            TaskType::KnowledgeGraphRefresh => "knowledge_graph_refresh",
        }
    }
}

impl std::fmt::Display for TaskType {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress_percentage: Option<f64>,
    pub current_step: Option<String>,
    pub completed_steps: Option<i64>,
    pub elapsed_time_seconds: Option<f64>,
    pub remaining_time_seconds: Option<i64>,
    pub result_data: Option<Value>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WikiPage {
    pub id: i64,
    pub project_id: i64,
    pub slug: String,
    pub title: String,
    pub content: String,
    pub lens_type: Option<LensType>,
    pub parent_id: Option<i64>,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWikiPage {
    pub project_id: i64,
    pub slug: String,
    pub title: String,
    pub content: String,
    pub lens_type: Option<LensType>,
    pub parent_id: Option<i64>,
    pub sort_order: i64,
}

/// Per-project rollup returned by the project listing commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectStatistics {
    pub project: Project,
    pub document_count: i64,
    pub chunk_count: i64,
    pub active_tasks: i64,
}

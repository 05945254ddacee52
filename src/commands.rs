use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::HarvesterError;
use crate::config::{Config, LlmProviderKind};
use crate::coverage::CoverageEngine;
use crate::database::Database;
use crate::database::models::{NewProject, Project};
use crate::graph::UnavailableGraphStore;
use crate::ingest::{DocumentProcessor, IngestionOrchestrator};
use crate::llm::LlmService;
use crate::tasks::ProgressTracker;
use crate::wiki::WikiGenerator;

async fn open(base_dir: &Path) -> Result<(Config, Database)> {
    let config = Config::load(base_dir)?;
    let database = Database::initialize_from_base_dir(base_dir)
        .await
        .context("Failed to initialize database")?;
    Ok((config, database))
}

/// Look a project up by numeric id or by name.
async fn resolve_project(database: &Database, selector: &str) -> Result<Project> {
    let project = if let Ok(id) = selector.parse::<i64>() {
        database.get_project(id).await?
    } else {
        database.get_project_by_name(selector).await?
    };

    project.ok_or_else(|| HarvesterError::NotFound(format!("Project: {selector}")).into())
}

/// An LLM handle when a provider is configured; `None` degrades the
/// pipeline to its deterministic fallbacks.
async fn llm_service(config: &Config, database: &Database) -> Result<Option<Arc<LlmService>>> {
    let service = LlmService::resolve(&config.llm, database.pool()).await?;
    Ok((service.provider() != LlmProviderKind::None).then(|| Arc::new(service)))
}

async fn wiki_generator(config: &Config, database: &Database) -> Result<WikiGenerator> {
    let llm = llm_service(config, database).await?;
    let processor = Arc::new(DocumentProcessor::new(
        database.pool().clone(),
        config,
        llm,
        Arc::new(UnavailableGraphStore),
    ));
    let tracker = Arc::new(ProgressTracker::new(database.pool().clone()));
    Ok(WikiGenerator::new(processor, tracker))
}

/// Create a new project
#[inline]
pub async fn add_project(
    base_dir: &Path,
    name: String,
    description: Option<String>,
    tags: Vec<String>,
    owners: Vec<String>,
    folder: Option<String>,
) -> Result<()> {
    let (_config, database) = open(base_dir).await?;

    if let Some(existing) = database.get_project_by_name(&name).await? {
        println!("Project already exists: {} (ID: {})", existing.name, existing.id);
        return Ok(());
    }

    let connector_configs = match &folder {
        Some(path) => serde_json::json!({ "local_folder": { "path": path } }),
        None => serde_json::json!({}),
    };

    let project = database
        .create_project(NewProject {
            name,
            description,
            tags,
            owners,
            connector_configs,
        })
        .await
        .context("Failed to create project")?;

    info!("Created project {}", project.id);
    println!("Created project: {} (ID: {})", project.name, project.id);
    if let Some(path) = folder {
        println!("Watching folder: {path}");
    }
    println!(
        "Drop files into the uploads folder or run 'docharvester ingest {}' to index them.",
        project.id
    );

    Ok(())
}

/// List all projects with document and task counts
#[inline]
pub async fn list_projects(base_dir: &Path) -> Result<()> {
    let (_config, database) = open(base_dir).await?;

    let projects = database.list_projects().await.context("Failed to list projects")?;

    if projects.is_empty() {
        println!("No projects have been created yet.");
        println!("Use 'docharvester project add <name>' to create one.");
        return Ok(());
    }

    println!("Projects ({} total):", projects.len());
    println!();

    for project in &projects {
        println!("📁 {} (ID: {})", project.name, project.id);
        if let Some(description) = &project.description {
            println!("   {description}");
        }
        if !project.tags.0.is_empty() {
            println!("   Tags: {}", project.tags.0.join(", "));
        }

        match database.get_project_statistics(project.id).await {
            Ok(Some(stats)) => {
                println!(
                    "   Documents: {}, Chunks: {}",
                    stats.document_count, stats.chunk_count
                );
                if stats.active_tasks > 0 {
                    println!("   Active Tasks: {}", stats.active_tasks);
                }
            }
            Ok(None) => {}
            Err(e) => println!("   Statistics: Error - {e}"),
        }

        println!("   Created: {}", project.created_at.format("%Y-%m-%d %H:%M:%S"));
        println!();
    }

    Ok(())
}

/// Delete a project and everything stored under it
#[inline]
pub async fn delete_project(base_dir: &Path, selector: String) -> Result<()> {
    let (_config, database) = open(base_dir).await?;

    let project = resolve_project(&database, &selector).await?;
    let deleted = database.delete_project(project.id).await?;

    if deleted {
        // Cascade deletes drop the project's documents and chunks; reclaim
        // the space before returning.
        database.optimize().await?;
        println!("Deleted project: {} (ID: {})", project.name, project.id);
    } else {
        println!("Project {} was already gone.", project.id);
    }

    Ok(())
}

/// Run full ingestion for a project
#[inline]
pub async fn ingest_project(base_dir: &Path, selector: String) -> Result<()> {
    let (config, database) = open(base_dir).await?;

    let project = resolve_project(&database, &selector).await?;
    let llm = llm_service(&config, &database).await?;

    info!("Starting ingestion for project {}", project.id);

    let orchestrator = IngestionOrchestrator::from_config(database.pool().clone(), &config, llm);
    let summary = orchestrator.ingest_project(project.id).await?;

    println!("Ingestion completed for '{}':", project.name);
    println!("  Documents processed: {}", summary.documents_processed);
    println!("  Errors: {}", summary.errors);

    for result in &summary.results {
        match &result.error {
            None => println!("  ✓ {} ({} chunks)", result.title, result.chunk_count),
            Some(error) => println!("  ✗ {}: {}", result.title, error),
        }
    }

    if summary.documents_processed > 0 {
        println!("A wiki refresh has been started in the background.");
    }

    Ok(())
}

/// Check lens coverage for a project
#[inline]
pub async fn check_coverage(base_dir: &Path, selector: String) -> Result<()> {
    let (config, database) = open(base_dir).await?;

    let project = resolve_project(&database, &selector).await?;
    let engine = CoverageEngine::new(database.pool().clone());
    let report = engine
        .check_coverage(project.id, &config.coverage_config_path())
        .await?;

    println!("Coverage for '{}':", project.name);
    println!();

    for lens in &report.lenses {
        let required = if lens.is_required { "required" } else { "optional" };
        println!(
            "  {} ({}): {:.1}% [{}]",
            lens.lens_type, required, lens.coverage_percentage, lens.status
        );
        println!(
            "    Documents: {}/{}, Chunks: {} ({} with entities)",
            lens.document_count, lens.min_documents, lens.chunk_count, lens.chunks_with_entities
        );
        if !lens.missing_topics.is_empty() {
            println!("    Missing: {}", lens.missing_topics.join("; "));
        }
    }

    Ok(())
}

/// Show the coverage gap analysis for a project
#[inline]
pub async fn show_gaps(base_dir: &Path, selector: String) -> Result<()> {
    let (_config, database) = open(base_dir).await?;

    let project = resolve_project(&database, &selector).await?;
    let engine = CoverageEngine::new(database.pool().clone());
    let analysis = engine.gap_analysis(project.id).await?;

    println!("Gap analysis for '{}':", project.name);
    println!("  Overall coverage: {:.1}%", analysis.overall_coverage);
    println!();

    for gap in &analysis.gaps {
        println!("  {} ({:.1}%)", gap.lens_type, gap.coverage_percentage);
        println!("    {}", gap.suggestion);
        if !gap.existing_topics.is_empty() {
            println!("    Covered: {}", gap.existing_topics.join("; "));
        }
        if !gap.missing_topics.is_empty() {
            println!("    Missing: {}", gap.missing_topics.join("; "));
        }
    }

    Ok(())
}

/// Show prioritized coverage recommendations for a project
#[inline]
pub async fn show_recommendations(base_dir: &Path, selector: String) -> Result<()> {
    let (config, database) = open(base_dir).await?;

    let project = resolve_project(&database, &selector).await?;
    let engine = CoverageEngine::new(database.pool().clone());
    let recommendations = engine
        .recommendations(project.id, &config.coverage_config_path())
        .await?;

    if recommendations.is_empty() {
        println!("No recommendations: coverage requirements are met.");
        return Ok(());
    }

    println!("Recommendations for '{}':", project.name);
    for recommendation in &recommendations {
        println!(
            "  [{:?}] {} — {}",
            recommendation.priority, recommendation.lens_type, recommendation.action
        );
        if !recommendation.topics.is_empty() {
            println!("    Topics: {}", recommendation.topics.join("; "));
        }
    }

    Ok(())
}

/// Regenerate the wiki for a project
#[inline]
pub async fn generate_wiki(base_dir: &Path, selector: String) -> Result<()> {
    let (config, database) = open(base_dir).await?;

    let project = resolve_project(&database, &selector).await?;
    let generator = wiki_generator(&config, &database).await?;
    let pages = generator.generate_wiki(project.id).await?;

    println!("Generated {} wiki pages for '{}':", pages.len(), project.name);
    for page in &pages {
        let indent = if page.parent_id.is_some() { "    " } else { "  " };
        println!("{indent}{} ({})", page.title, page.slug);
    }

    Ok(())
}

/// Generate draft documents for lenses below their coverage minimums
#[inline]
pub async fn generate_missing_docs(base_dir: &Path, selector: String) -> Result<()> {
    let (config, database) = open(base_dir).await?;

    let project = resolve_project(&database, &selector).await?;
    let generator = wiki_generator(&config, &database).await?;
    let created = generator
        .generate_missing_docs(project.id, &config.coverage_config_path())
        .await?;

    if created == 0 {
        println!("No drafts needed: every required lens meets its minimum.");
    } else {
        println!(
            "Created {} draft documents for '{}'. Review and approve them before relying on them.",
            created, project.name
        );
    }

    Ok(())
}

/// List processing tasks for a project
#[inline]
pub async fn list_tasks(base_dir: &Path, selector: String, all: bool) -> Result<()> {
    let (_config, database) = open(base_dir).await?;

    let project = resolve_project(&database, &selector).await?;
    let tracker = ProgressTracker::new(database.pool().clone());
    let tasks = if all {
        tracker.list_all(project.id).await?
    } else {
        tracker.list_active(project.id).await?
    };

    if tasks.is_empty() {
        if all {
            println!("No tasks recorded for '{}'.", project.name);
        } else {
            println!("No active tasks for '{}'. Use --all to include finished ones.", project.name);
        }
        return Ok(());
    }

    println!("Tasks for '{}':", project.name);
    for task in &tasks {
        println!(
            "  #{} {} [{}] {:.0}% ({})",
            task.id, task.task_type, task.status, task.progress_percentage, task.current_step
        );
        if task.is_active() {
            println!("    Remaining: ~{}s", task.remaining_time_seconds);
        }
        if let Some(error) = &task.error_message {
            println!("    Error: {error}");
        }
    }

    Ok(())
}

/// Cancel a running task
#[inline]
pub async fn cancel_task(base_dir: &Path, task_id: i64) -> Result<()> {
    let (_config, database) = open(base_dir).await?;

    let tracker = ProgressTracker::new(database.pool().clone());
    if tracker.cancel(task_id).await? {
        println!("Cancelled task {task_id}.");
    } else {
        println!("Task {task_id} had already finished.");
    }

    Ok(())
}

/// Show the effective configuration
#[inline]
pub fn show_config(base_dir: &Path) -> Result<()> {
    let config = Config::load(base_dir)?;

    println!("Data directory: {}", base_dir.display());
    println!("Database: {}", config.database_path().display());
    println!("Uploads: {}", config.uploads_dir().display());
    println!("Coverage requirements: {}", config.coverage_config_path().display());
    println!();
    println!("LLM provider: {:?}", config.llm.provider);
    println!("LLM model: {}", config.llm.model);
    println!("Embedding endpoint: {}", if config.embedding.endpoint.is_empty() {
        "(disabled, random fallback vectors)"
    } else {
        &config.embedding.endpoint
    });
    println!("Embedding dimension: {}", config.embedding.dimension);
    println!(
        "Chunking: {} tokens, {} overlap",
        config.chunking.chunk_size, config.chunking.chunk_overlap
    );

    Ok(())
}

/// Probe the configured LLM provider
#[inline]
pub async fn show_llm_status(base_dir: &Path) -> Result<()> {
    let (config, database) = open(base_dir).await?;

    let service = LlmService::resolve(&config.llm, database.pool()).await?;
    let status = service.validate_connection();

    println!("Provider: {}", status.provider);
    println!("Model: {}", status.model);
    if status.valid {
        println!("Status: reachable");
        if !status.available_models.is_empty() {
            println!("Available models:");
            for model in &status.available_models {
                println!("  - {model}");
            }
        }
    } else {
        println!(
            "Status: unreachable ({})",
            status.error.as_deref().unwrap_or("unknown")
        );
    }

    Ok(())
}

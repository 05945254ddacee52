use std::path::Path;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};

use crate::HarvesterError;
use crate::database::models::{NewProject, Project, ProjectStatistics};
use crate::database::queries::ProjectQueries;


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(|e| {
                HarvesterError::Database(format!("Failed to create connection pool: {e}"))
            })?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| HarvesterError::Database(format!("Failed to run schema migration: {e}")))?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    pub async fn initialize_from_base_dir(base_dir: &Path) -> Result<Self> {
        let db_path = base_dir.join("harvester.db");

        std::fs::create_dir_all(base_dir).with_context(|| {
            format!("Failed to create data directory: {}", base_dir.display())
        })?;

        Self::new(db_path).await
    }

    // Project operations
    pub async fn create_project(&self, new_project: NewProject) -> Result<Project> {
        ProjectQueries::create(&self.pool, new_project).await
    }

    pub async fn get_project(&self, id: i64) -> Result<Option<Project>> {
        ProjectQueries::get_by_id(&self.pool, id).await
    }

    pub async fn get_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        ProjectQueries::get_by_name(&self.pool, name).await
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        ProjectQueries::list_all(&self.pool).await
    }

    pub async fn delete_project(&self, id: i64) -> Result<bool> {
        ProjectQueries::delete(&self.pool, id).await
    }

    pub async fn get_project_statistics(&self, id: i64) -> Result<Option<ProjectStatistics>> {
        ProjectQueries::get_statistics(&self.pool, id).await
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("Failed to vacuum database")?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .context("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }
}

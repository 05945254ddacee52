use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarvesterError>;

#[derive(Error, Debug)]
pub enum HarvesterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connector error: {0}")]
    Connector(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod connectors;
pub mod coverage;
pub mod database;
pub mod embeddings;
pub mod graph;
pub mod ingest;
pub mod llm;
pub mod processing;
pub mod tasks;
pub mod wiki;

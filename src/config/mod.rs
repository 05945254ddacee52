
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::HarvesterError;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1536;

/// Default data directory: `~/.docharvester`.
pub fn default_base_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".docharvester"))
        .context("Unable to determine home directory")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub coverage_config_path: Option<PathBuf>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Which LLM backend serves classification, extraction, and generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    Ollama,
    OpenAi,
    /// No backend configured; callers degrade to deterministic fallbacks.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub ollama_url: String,
    pub openai_api_key: Option<String>,
    pub model: String,
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::None,
            ollama_url: "http://localhost:11434".to_string(),
            openai_api_key: None,
            model: "gemma:2b".to_string(),
            timeout_seconds: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of an Ollama-compatible embedding endpoint. Empty disables
    /// remote embedding and every chunk receives a random fallback vector.
    pub endpoint: String,
    pub model: String,
    pub dimension: u32,
    pub batch_size: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: "nomic-embed-text:latest".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens.
    pub chunk_size: usize,
    /// Overlap carried between adjacent chunks, in tokens.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid chunk size: {0} (must be between 50 and 8192)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid LLM timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("OpenAI provider selected but no API key configured")]
    MissingApiKey,
}

impl Config {
    pub fn load<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let config_path = base_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                llm: LlmConfig::default(),
                embedding: EmbeddingConfig::default(),
                chunking: ChunkingConfig::default(),
                coverage_config_path: None,
                base_dir: base_dir.as_ref().to_path_buf(),
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = base_dir.as_ref().to_path_buf();

        config
            .validate()
            .map_err(|e| HarvesterError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.validate()
            .map_err(|e| HarvesterError::Config(e.to_string()))?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!("Failed to create config directory: {}", self.base_dir.display())
        })?;

        let config_path = self.base_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(50..=8192).contains(&self.chunking.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(self.chunking.chunk_size));
        }

        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                self.chunking.chunk_overlap,
                self.chunking.chunk_size,
            ));
        }

        if !(64..=4096).contains(&self.embedding.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding.dimension,
            ));
        }

        if self.embedding.batch_size == 0 || self.embedding.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.embedding.batch_size));
        }

        if self.llm.timeout_seconds == 0 || self.llm.timeout_seconds > 600 {
            return Err(ConfigError::InvalidTimeout(self.llm.timeout_seconds));
        }

        if self.llm.provider == LlmProviderKind::OpenAi && self.llm.openai_api_key.is_none() {
            return Err(ConfigError::MissingApiKey);
        }

        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.base_dir.join("harvester.db")
    }

    /// Per-project upload folders live under this directory, one subfolder
    /// per project id.
    pub fn uploads_dir(&self) -> PathBuf {
        self.base_dir.join("uploads")
    }

    pub fn coverage_config_path(&self) -> PathBuf {
        self.coverage_config_path
            .clone()
            .unwrap_or_else(|| self.base_dir.join("coverage.yml"))
    }
}

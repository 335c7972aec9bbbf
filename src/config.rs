use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hash` (deterministic local), `openai`, or `disabled`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of candidate documents retrieved for a chat answer.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum similarity score for a document to count as grounding.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    /// Snippet length attached to chat sources.
    #[serde(default = "default_max_snippet_chars")]
    pub max_snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            max_snippet_chars: default_max_snippet_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_min_score() -> f32 {
    0.15
}
fn default_max_snippet_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Maximum messages fetched from a connector per sync run.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    /// Message bodies are truncated to this many chars before embedding,
    /// so repeated runs produce the same vector for the same content.
    #[serde(default = "default_body_char_budget")]
    pub body_char_budget: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_limit: default_fetch_limit(),
            body_char_budget: default_body_char_budget(),
        }
    }
}

fn default_fetch_limit() -> usize {
    100
}
fn default_body_char_budget() -> usize {
    4000
}

impl Config {
    /// Minimal config for tests and one-shot CLI use.
    pub fn minimal(db_path: PathBuf) -> Self {
        Self {
            db: DbConfig { path: db_path },
            server: ServerConfig {
                bind: "127.0.0.1:8000".to_string(),
            },
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.min_score) {
        anyhow::bail!("retrieval.min_score must be in [0.0, 1.0]");
    }
    if config.sync.fetch_limit == 0 {
        anyhow::bail!("sync.fetch_limit must be >= 1");
    }
    if config.sync.body_char_budget == 0 {
        anyhow::bail!("sync.body_char_budget must be >= 1");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "hash" | "openai" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, or disabled.",
            other
        ),
    }

    if config.embedding.provider == "openai" {
        if config.embedding.model.is_none() {
            anyhow::bail!("embedding.model must be specified for the openai provider");
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0 for the openai provider");
        }
    }

    Ok(config)
}

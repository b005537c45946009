use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AgentdexError, Result};
use crate::types::DistanceMetric;

/// Environment key holding the embedding provider credential.
pub const ENV_EMBEDDING_API_KEY: &str = "OPENAI_API_KEY";
/// Environment key holding the vector store credential.
pub const ENV_INDEX_API_KEY: &str = "PINECONE_API_KEY";
/// Environment key holding the vector store deployment region.
pub const ENV_INDEX_ENVIRONMENT: &str = "PINECONE_ENVIRONMENT";
/// Environment key holding the vector store index name.
pub const ENV_INDEX_NAME: &str = "PINECONE_INDEX_NAME";

/// Top-level configuration for agentdex.
///
/// Loaded from `~/.agentdex/config.toml` by default. Secrets are never part
/// of this file; they come from the environment as [`Credentials`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentdexConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl AgentdexConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentdexConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, or defaults when the file does
    /// not exist. A file that exists but cannot be read or parsed is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Environment keys that must be present for the selected providers.
    pub fn required_env_keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.embedding.provider == EmbeddingProviderKind::OpenAi {
            keys.push(ENV_EMBEDDING_API_KEY);
        }
        if self.index.provider == IndexProviderKind::Pinecone {
            keys.extend([ENV_INDEX_API_KEY, ENV_INDEX_ENVIRONMENT, ENV_INDEX_NAME]);
        }
        keys
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    /// OpenAI-compatible `/embeddings` endpoint.
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Deterministic hash-based vectors; needs no network.
    Mock,
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    /// Embedding model name.
    pub model: String,
    /// Embedding dimension produced by the model.
    pub dimensions: usize,
    /// Base URL of the OpenAI-compatible API.
    pub api_base: String,
    /// Inputs estimated above this many tokens are rejected.
    pub max_input_tokens: usize,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::OpenAi,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            api_base: "https://api.openai.com/v1".to_string(),
            max_input_tokens: 8191,
            request_timeout_secs: 30,
        }
    }
}

/// Which vector index backend to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexProviderKind {
    /// Managed Pinecone index.
    #[default]
    Pinecone,
    /// Process-local brute-force index.
    Memory,
}

/// Vector index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub provider: IndexProviderKind,
    /// Distance metric used when the index is created.
    pub metric: DistanceMetric,
    /// Cloud for serverless index creation.
    pub cloud: String,
    /// Control-plane base URL.
    pub api_base: String,
    /// Namespace within the index.
    pub namespace: String,
    /// Upper bound on waiting for a new index to become ready.
    pub provisioning_timeout_secs: u64,
    /// Delay between readiness polls.
    pub poll_interval_ms: u64,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: IndexProviderKind::Pinecone,
            metric: DistanceMetric::Cosine,
            cloud: "aws".to_string(),
            api_base: "https://api.pinecone.io".to_string(),
            namespace: String::new(),
            provisioning_timeout_secs: 120,
            poll_interval_ms: 2000,
            request_timeout_secs: 30,
        }
    }
}

/// Retry policy for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay_ms: u64,
    /// Cap on a single backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5000,
        }
    }
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Default number of results.
    pub default_top_k: usize,
    /// Requests above this are clamped.
    pub max_top_k: usize,
    /// Candidates fetched per requested result, to survive filtering.
    pub overfetch_factor: usize,
    /// Default deadline for a single indexer call.
    pub call_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            max_top_k: 100,
            overfetch_factor: 3,
            call_timeout_secs: 60,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS.
    pub allowed_origins: Vec<String>,
    /// Request body limit in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3040,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            max_body_bytes: 256 * 1024,
        }
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// A credential that never prints its value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for building request headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Secrets and deployment identifiers read from the environment at startup.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub embedding_api_key: Option<Secret>,
    pub index_api_key: Option<Secret>,
    /// Vector store deployment region.
    pub index_environment: Option<String>,
    pub index_name: Option<String>,
}

impl Credentials {
    /// Read credentials from the process environment.
    pub fn from_env(config: &AgentdexConfig) -> Result<Self> {
        Self::from_lookup(config, |key| std::env::var(key).ok())
    }

    /// Read credentials through `lookup`, failing with every missing key
    /// the selected providers require.
    ///
    /// Blank values count as missing.
    pub fn from_lookup<F>(config: &AgentdexConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let missing: Vec<String> = config
            .required_env_keys()
            .into_iter()
            .filter(|key| get(*key).is_none())
            .map(String::from)
            .collect();
        if !missing.is_empty() {
            return Err(AgentdexError::MissingConfig(missing));
        }

        Ok(Self {
            embedding_api_key: get(ENV_EMBEDDING_API_KEY).map(Secret::new),
            index_api_key: get(ENV_INDEX_API_KEY).map(Secret::new),
            index_environment: get(ENV_INDEX_ENVIRONMENT),
            index_name: get(ENV_INDEX_NAME),
        })
    }
}

use std::time::Duration;

use thiserror::Error;

/// Failures reported by an embedding provider.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EmbeddingError {
    #[error("Cannot embed empty text")]
    EmptyInput,

    #[error("Input too large: ~{estimated_tokens} tokens exceeds limit of {max_tokens}")]
    InputTooLarge {
        estimated_tokens: usize,
        max_tokens: usize,
    },

    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Embedding provider rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Embedding provider rejected credentials: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),
}

impl EmbeddingError {
    /// Whether the failure is worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EmbeddingError::ProviderUnavailable(_) | EmbeddingError::RateLimited { .. }
        )
    }
}

/// Failures reported by a vector index.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IndexError {
    #[error("Index schema mismatch: index has dimension {existing}, requested {requested}")]
    SchemaMismatch { existing: usize, requested: usize },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index not ready after {waited:?}")]
    ProvisioningTimeout { waited: Duration },

    #[error("Index has not been provisioned; call ensure_index first")]
    NotProvisioned,

    #[error("Vector index unavailable: {0}")]
    Unavailable(String),

    #[error("Vector index rejected credentials: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid vector index response: {0}")]
    InvalidResponse(String),
}

impl IndexError {
    /// Whether the failure is worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexError::Unavailable(_))
    }
}

/// Top-level error type for agentdex.
///
/// Provider failures keep their own enums and convert with `#[from]` so the
/// `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AgentdexError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required configuration: {}", .0.join(", "))]
    MissingConfig(Vec<String>),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Indexing failed for agent {agent_id}: {cause}")]
    IndexingFailed {
        agent_id: String,
        #[source]
        cause: Box<AgentdexError>,
    },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid agent card: {0}")]
    InvalidAgentCard(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0:?}")]
    TimedOut(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AgentdexError {
    /// Wrap a provider failure that happened while indexing `agent_id`.
    pub fn indexing_failed(agent_id: impl Into<String>, cause: impl Into<AgentdexError>) -> Self {
        AgentdexError::IndexingFailed {
            agent_id: agent_id.into(),
            cause: Box::new(cause.into()),
        }
    }

    /// The innermost error, looking through `IndexingFailed`.
    pub fn root_cause(&self) -> &AgentdexError {
        match self {
            AgentdexError::IndexingFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

impl From<toml::de::Error> for AgentdexError {
    fn from(err: toml::de::Error) -> Self {
        AgentdexError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AgentdexError {
    fn from(err: toml::ser::Error) -> Self {
        AgentdexError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AgentdexError {
    fn from(err: serde_json::Error) -> Self {
        AgentdexError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for agentdex operations.
pub type Result<T> = std::result::Result<T, AgentdexError>;

//! Provider construction from configuration and credentials.

use std::sync::Arc;

use agentdex_core::config::{
    AgentdexConfig, Credentials, EmbeddingProviderKind, IndexProviderKind, Secret,
    ENV_EMBEDDING_API_KEY, ENV_INDEX_API_KEY, ENV_INDEX_ENVIRONMENT, ENV_INDEX_NAME,
};
use agentdex_core::error::{AgentdexError, Result};
use agentdex_vector::{
    AgentIndexer, DynEmbeddingProvider, DynVectorIndex, InMemoryIndex, MockEmbedding,
    OpenAiEmbedding, PineconeIndex, RetryPolicy,
};

fn required<T: Clone>(value: &Option<T>, key: &str) -> Result<T> {
    value
        .clone()
        .ok_or_else(|| AgentdexError::MissingConfig(vec![key.to_string()]))
}

/// Build the embedding provider selected by `config.embedding.provider`.
pub fn build_embedder(
    config: &AgentdexConfig,
    credentials: &Credentials,
) -> Result<Arc<dyn DynEmbeddingProvider>> {
    let embedder: Arc<dyn DynEmbeddingProvider> = match config.embedding.provider {
        EmbeddingProviderKind::OpenAi => {
            let key: Secret = required(&credentials.embedding_api_key, ENV_EMBEDDING_API_KEY)?;
            Arc::new(OpenAiEmbedding::new(
                &config.embedding,
                key,
                RetryPolicy::from_config(&config.retry),
            )?)
        }
        EmbeddingProviderKind::Mock => Arc::new(
            MockEmbedding::with_dimensions(config.embedding.dimensions)
                .with_max_input_tokens(config.embedding.max_input_tokens),
        ),
    };
    tracing::info!(
        provider = ?config.embedding.provider,
        model = %config.embedding.model,
        dimensions = embedder.dimensions(),
        "Embedding provider ready"
    );
    Ok(embedder)
}

/// Build the vector index selected by `config.index.provider`.
pub fn build_index(
    config: &AgentdexConfig,
    credentials: &Credentials,
) -> Result<Arc<dyn DynVectorIndex>> {
    let index: Arc<dyn DynVectorIndex> = match config.index.provider {
        IndexProviderKind::Pinecone => {
            let key = required(&credentials.index_api_key, ENV_INDEX_API_KEY)?;
            let region = required(&credentials.index_environment, ENV_INDEX_ENVIRONMENT)?;
            let name = required(&credentials.index_name, ENV_INDEX_NAME)?;
            tracing::info!(index = %name, region = %region, "Using managed vector index");
            Arc::new(PineconeIndex::new(
                &config.index,
                name,
                region,
                key,
                RetryPolicy::from_config(&config.retry),
            )?)
        }
        IndexProviderKind::Memory => {
            tracing::info!("Using in-memory vector index; entries are lost on exit");
            Arc::new(InMemoryIndex::new())
        }
    };
    Ok(index)
}

/// Compose the indexer. Does not contact any provider.
pub fn build_indexer(config: &AgentdexConfig, credentials: &Credentials) -> Result<AgentIndexer> {
    Ok(AgentIndexer::new_dyn(
        build_embedder(config, credentials)?,
        build_index(config, credentials)?,
        config.index.metric,
        config.search.clone(),
    ))
}

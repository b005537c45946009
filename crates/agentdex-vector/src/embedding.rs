//! Embedding provider trait and implementations.
//!
//! - `OpenAiEmbedding` calls an OpenAI-compatible `/embeddings` endpoint with
//!   a bearer credential. This is the production embedding backend.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use agentdex_core::config::{EmbeddingConfig, Secret};
use agentdex_core::error::EmbeddingError;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::retry::RetryPolicy;

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors. Identical
/// text yields vectors usable interchangeably for similarity comparison;
/// callers must not assume bit-identical output across provider upgrades.
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, EmbeddingError>> + Send;

    /// Return the dimensionality of vectors produced by this provider.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingProvider`] for dynamic dispatch.
///
/// A blanket implementation is provided so that every `EmbeddingProvider`
/// automatically implements `DynEmbeddingProvider`.
pub trait DynEmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text (boxed future).
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, EmbeddingError>> + Send + 'a>>;

    /// Return the dimensionality of vectors produced by this provider.
    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingProvider> DynEmbeddingProvider for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, EmbeddingError>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingProvider::dimensions(self)
    }
}

/// Conservative token estimate for inputs to BPE-tokenized models.
///
/// Takes the larger of `chars / 4` and `words * 4 / 3`, rounded up, so
/// dense text and long-word text both err on the high side.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    let words = text.split_whitespace().count();
    chars.div_ceil(4).max((words * 4).div_ceil(3))
}

fn check_input(text: &str, max_tokens: usize) -> Result<(), EmbeddingError> {
    if text.trim().is_empty() {
        return Err(EmbeddingError::EmptyInput);
    }
    let estimated_tokens = estimate_tokens(text);
    if estimated_tokens > max_tokens {
        return Err(EmbeddingError::InputTooLarge {
            estimated_tokens,
            max_tokens,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// OpenAiEmbedding - hosted embeddings over HTTPS
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI-compatible embedding provider.
///
/// Transient failures (network errors, 5xx, 429) are retried according to
/// the configured [`RetryPolicy`]; everything else is returned immediately.
pub struct OpenAiEmbedding {
    client: Client,
    api_base: String,
    api_key: Secret,
    model: String,
    dimensions: usize,
    max_input_tokens: usize,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OpenAiEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedding")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OpenAiEmbedding {
    /// Build a provider with its own HTTP client.
    pub fn new(
        config: &EmbeddingConfig,
        api_key: Secret,
        retry: RetryPolicy,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::ProviderUnavailable(format!("HTTP client: {}", e)))?;
        Ok(Self::with_client(client, config, api_key, retry))
    }

    /// Build a provider around an existing HTTP client.
    pub fn with_client(
        client: Client,
        config: &EmbeddingConfig,
        api_key: Secret,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            dimensions: config.dimensions,
            max_input_tokens: config.max_input_tokens,
            retry,
        }
    }

    /// Only the text-embedding-3 family accepts a `dimensions` parameter.
    fn requested_dimensions(&self) -> Option<usize> {
        self.model
            .starts_with("text-embedding-3")
            .then_some(self.dimensions)
    }

    async fn request_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/embeddings", self.api_base);
        let body = EmbeddingRequest {
            model: &self.model,
            input: text,
            dimensions: self.requested_dimensions(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let message = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, message));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty 'data' array".to_string()))?;

        if embedding.len() != self.dimensions {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        Ok(embedding)
    }
}

impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        check_input(text, self.max_input_tokens)?;
        debug!(model = %self.model, chars = text.len(), "Requesting embedding");
        self.retry.run("embed", || self.request_once(text)).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    message: String,
) -> EmbeddingError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            EmbeddingError::AuthenticationFailed(format!("status {}", status.as_u16()))
        }
        StatusCode::TOO_MANY_REQUESTS => EmbeddingError::RateLimited { retry_after },
        s if s.is_server_error() => {
            EmbeddingError::ProviderUnavailable(format!("status {}: {}", s.as_u16(), message))
        }
        s => EmbeddingError::InvalidResponse(format!("status {}: {}", s.as_u16(), message)),
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedding provider that returns deterministic vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce bit-identical outputs. Vectors are L2-normalized to match
/// hosted providers.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
    max_input_tokens: usize,
}

impl MockEmbedding {
    /// Mock producing 1536-dimensional vectors, the default model size.
    pub fn new() -> Self {
        Self::with_dimensions(1536)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            max_input_tokens: EmbeddingConfig::default().max_input_tokens,
        }
    }

    pub fn with_max_input_tokens(mut self, max_input_tokens: usize) -> Self {
        self.max_input_tokens = max_input_tokens;
        self
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        check_input(text, self.max_input_tokens)?;
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

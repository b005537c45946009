//! Managed vector index backed by Pinecone's REST API.
//!
//! The control plane (`/indexes`) lives at the configured API base; vector
//! operations go to the per-index host returned when the index is described.
//! Query results become invisible after a delete within the store's
//! freshness window, typically a few seconds on serverless indexes.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use agentdex_core::config::{IndexConfig, Secret};
use agentdex_core::error::IndexError;
use agentdex_core::types::{DistanceMetric, IndexStats, SearchFilters};

use crate::index::{rank_matches, IndexMatch, VectorIndex};
use crate::embedding::parse_retry_after;
use crate::retry::{RetryPolicy, Retryable};

const API_VERSION: &str = "2024-07";

#[derive(Debug, Clone, Deserialize)]
struct IndexDescription {
    dimension: usize,
    metric: DistanceMetric,
    #[serde(default)]
    host: String,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: [UpsertVector<'a>; 1],
    namespace: &'a str,
}

#[derive(Debug, Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    namespace: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    score: f64,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    total_vector_count: u64,
    #[serde(default)]
    namespaces: std::collections::HashMap<String, NamespaceStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceStats {
    #[serde(default)]
    vector_count: u64,
}

/// Resolved data-plane handle, known once the index is ready.
#[derive(Debug, Clone)]
struct IndexHandle {
    base_url: String,
    dimension: usize,
    metric: DistanceMetric,
}

/// Pinecone serverless index client.
pub struct PineconeIndex {
    client: Client,
    api_base: String,
    api_key: Secret,
    index_name: String,
    cloud: String,
    region: String,
    namespace: String,
    provisioning_timeout: Duration,
    poll_interval: Duration,
    retry: RetryPolicy,
    handle: RwLock<Option<IndexHandle>>,
}

impl std::fmt::Debug for PineconeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PineconeIndex")
            .field("api_base", &self.api_base)
            .field("index_name", &self.index_name)
            .field("region", &self.region)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl PineconeIndex {
    /// Build a client with its own HTTP connection pool.
    pub fn new(
        config: &IndexConfig,
        index_name: impl Into<String>,
        region: impl Into<String>,
        api_key: Secret,
        retry: RetryPolicy,
    ) -> Result<Self, IndexError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| IndexError::Unavailable(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            index_name: index_name.into(),
            cloud: config.cloud.clone(),
            region: region.into(),
            namespace: config.namespace.clone(),
            provisioning_timeout: Duration::from_secs(config.provisioning_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            retry,
            handle: RwLock::new(None),
        })
    }

    fn current_handle(&self) -> Result<IndexHandle, IndexError> {
        self.handle
            .read()
            .map_err(|e| IndexError::Unavailable(format!("Lock poisoned: {}", e)))?
            .clone()
            .ok_or(IndexError::NotProvisioned)
    }

    fn set_handle(&self, description: &IndexDescription) -> Result<(), IndexError> {
        let handle = IndexHandle {
            base_url: host_url(&description.host),
            dimension: description.dimension,
            metric: description.metric,
        };
        *self
            .handle
            .write()
            .map_err(|e| IndexError::Unavailable(format!("Lock poisoned: {}", e)))? = Some(handle);
        Ok(())
    }

    /// Send one request and decode the body, mapping HTTP failures to
    /// index error kinds.
    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<T, RequestError> {
        let mut request = self
            .client
            .request(method, url)
            .header("Api-Key", self.api_key.expose())
            .header("X-Pinecone-API-Version", API_VERSION);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RequestError::from(IndexError::Unavailable(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let message = response.text().await.unwrap_or_default();
            return Err(RequestError {
                status: Some(status),
                retry_after,
                error: classify_status(status, message),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RequestError::from(IndexError::Unavailable(e.to_string())))?;
        let body = if bytes.is_empty() { b"{}".as_slice() } else { &bytes[..] };
        serde_json::from_slice(body)
            .map_err(|e| RequestError::from(IndexError::InvalidResponse(e.to_string())))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<T, RequestError> {
        self.retry
            .run(operation, || self.send_once(method.clone(), url, body.as_ref()))
            .await
    }

    /// Data-plane call. A 404 from the index host means the index is gone.
    async fn send_data<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
        body: Value,
    ) -> Result<T, IndexError> {
        self.send(operation, Method::POST, url, Some(body))
            .await
            .map_err(|e| match e.status {
                Some(StatusCode::NOT_FOUND) => {
                    warn!(index = %self.index_name, operation, "Index host returned 404");
                    IndexError::NotProvisioned
                }
                _ => e.error,
            })
    }

    /// `Ok(None)` when the index does not exist.
    async fn describe(&self) -> Result<Option<IndexDescription>, IndexError> {
        let url = format!("{}/indexes/{}", self.api_base, self.index_name);
        match self.send("describe_index", Method::GET, &url, None).await {
            Ok(description) => Ok(Some(description)),
            Err(e) if e.status == Some(StatusCode::NOT_FOUND) => Ok(None),
            Err(e) => Err(e.error),
        }
    }

    async fn create(&self, dimension: usize, metric: DistanceMetric) -> Result<(), IndexError> {
        let url = format!("{}/indexes", self.api_base);
        let body = json!({
            "name": self.index_name,
            "dimension": dimension,
            "metric": metric.as_str(),
            "spec": {"serverless": {"cloud": self.cloud, "region": self.region}},
        });
        let result: Result<Value, RequestError> =
            self.send("create_index", Method::POST, &url, Some(body)).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.status == Some(StatusCode::CONFLICT) => {
                debug!(index = %self.index_name, "Index created concurrently");
                Ok(())
            }
            Err(e) => Err(e.error),
        }
    }

    async fn wait_until_ready(&self, started: Instant) -> Result<IndexDescription, IndexError> {
        loop {
            if let Some(description) = self.describe().await? {
                if description.status.ready && !description.host.is_empty() {
                    return Ok(description);
                }
                debug!(
                    index = %self.index_name,
                    state = %description.status.state,
                    "Waiting for index to become ready"
                );
            }
            let waited = started.elapsed();
            if waited >= self.provisioning_timeout {
                return Err(IndexError::ProvisioningTimeout { waited });
            }
            tokio::time::sleep(self.poll_interval.min(self.provisioning_timeout - waited)).await;
        }
    }

    fn data_url(handle: &IndexHandle, path: &str) -> String {
        format!("{}{}", handle.base_url, path)
    }
}

impl VectorIndex for PineconeIndex {
    async fn ensure_index(&self, dimension: usize, metric: DistanceMetric) -> Result<(), IndexError> {
        let started = Instant::now();
        let description = match self.describe().await? {
            Some(existing) => {
                if existing.dimension != dimension {
                    return Err(IndexError::SchemaMismatch {
                        existing: existing.dimension,
                        requested: dimension,
                    });
                }
                if existing.metric != metric {
                    warn!(
                        index = %self.index_name,
                        existing = %existing.metric,
                        requested = %metric,
                        "Index exists with a different metric; using the existing one"
                    );
                }
                if existing.status.ready && !existing.host.is_empty() {
                    existing
                } else {
                    self.wait_until_ready(started).await?
                }
            }
            None => {
                info!(index = %self.index_name, dimension, %metric, "Creating vector index");
                self.create(dimension, metric).await?;
                let ready = self.wait_until_ready(started).await?;
                if ready.dimension != dimension {
                    return Err(IndexError::SchemaMismatch {
                        existing: ready.dimension,
                        requested: dimension,
                    });
                }
                ready
            }
        };
        info!(
            index = %self.index_name,
            dimension = description.dimension,
            "Vector index ready"
        );
        self.set_handle(&description)
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<(), IndexError> {
        let handle = self.current_handle()?;
        if vector.len() != handle.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: handle.dimension,
                actual: vector.len(),
            });
        }
        let body = serde_json::to_value(UpsertRequest {
            vectors: [UpsertVector {
                id,
                values: &vector,
                metadata: &metadata,
            }],
            namespace: &self.namespace,
        })
        .map_err(|e| IndexError::InvalidResponse(e.to_string()))?;

        let url = Self::data_url(&handle, "/vectors/upsert");
        let _: Value = self.send_data("upsert", &url, body).await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<IndexMatch>, IndexError> {
        let handle = self.current_handle()?;
        if vector.len() != handle.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: handle.dimension,
                actual: vector.len(),
            });
        }
        let body = serde_json::to_value(QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            namespace: &self.namespace,
            filter: metadata_filter(filters),
        })
        .map_err(|e| IndexError::InvalidResponse(e.to_string()))?;

        let url = Self::data_url(&handle, "/query");
        let response: QueryResponse = self.send_data("query", &url, body).await?;

        let mut matches: Vec<IndexMatch> = response
            .matches
            .into_iter()
            .map(|m| IndexMatch {
                id: m.id,
                score: normalize_score(handle.metric, m.score),
                metadata: m.metadata.unwrap_or(Value::Object(Map::new())),
            })
            .collect();
        rank_matches(&mut matches);
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, id: &str) -> Result<(), IndexError> {
        let handle = self.current_handle()?;
        let body = json!({"ids": [id], "namespace": self.namespace});
        let url = Self::data_url(&handle, "/vectors/delete");
        let _: Value = self.send_data("delete", &url, body).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats, IndexError> {
        let handle = self.current_handle()?;
        let url = Self::data_url(&handle, "/describe_index_stats");
        let stats: StatsResponse = self
            .send_data("describe_index_stats", &url, json!({}))
            .await?;
        let vector_count = if self.namespace.is_empty() {
            stats.total_vector_count
        } else {
            stats
                .namespaces
                .get(&self.namespace)
                .map_or(0, |ns| ns.vector_count)
        };
        Ok(IndexStats {
            vector_count,
            dimension: stats.dimension.or(Some(handle.dimension)),
            metric: Some(handle.metric),
        })
    }
}

/// A failed attempt, with the HTTP status and retry hint when there was one.
#[derive(Debug)]
struct RequestError {
    status: Option<StatusCode>,
    retry_after: Option<Duration>,
    error: IndexError,
}

impl From<IndexError> for RequestError {
    fn from(error: IndexError) -> Self {
        Self {
            status: None,
            retry_after: None,
            error,
        }
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.error, f)
    }
}

impl Retryable for RequestError {
    fn is_transient(&self) -> bool {
        self.error.is_transient()
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// Data-plane hosts come back without a scheme.
fn host_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

/// Euclidean indexes report squared distance; everything else is already a
/// similarity.
fn normalize_score(metric: DistanceMetric, raw: f64) -> f64 {
    match metric {
        DistanceMetric::Euclidean => DistanceMetric::similarity_from_distance(raw.max(0.0).sqrt()),
        DistanceMetric::Cosine | DistanceMetric::DotProduct => raw,
    }
}

/// Translate capability and mode constraints into a metadata filter.
fn metadata_filter(filters: &SearchFilters) -> Option<Value> {
    let mut filter = Map::new();
    if !filters.capabilities.is_empty() {
        filter.insert(
            "capabilities".to_string(),
            json!({"$in": filters.capabilities}),
        );
    }
    if let Some(ref mode) = filters.input_mode {
        filter.insert("inputModes".to_string(), json!({"$in": [mode]}));
    }
    if let Some(ref mode) = filters.output_mode {
        filter.insert("outputModes".to_string(), json!({"$in": [mode]}));
    }
    (!filter.is_empty()).then_some(Value::Object(filter))
}

fn classify_status(status: StatusCode, message: String) -> IndexError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            IndexError::AuthenticationFailed(format!("status {}", status.as_u16()))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            IndexError::Unavailable(format!("status 429: {}", message))
        }
        s if s.is_server_error() => {
            IndexError::Unavailable(format!("status {}: {}", s.as_u16(), message))
        }
        s => IndexError::InvalidResponse(format!("status {}: {}", s.as_u16(), message)),
    }
}

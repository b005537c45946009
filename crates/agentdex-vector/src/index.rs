//! Vector index trait and the in-memory brute-force implementation.
//!
//! Scores are "higher is closer" for every metric: raw cosine similarity,
//! raw dot product, or `1 / (1 + distance)` for Euclidean. Matches are
//! ordered by descending score with ties broken by ascending id.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use agentdex_core::error::IndexError;
use agentdex_core::types::{DistanceMetric, IndexStats, SearchFilters};

/// A single match returned from a vector query.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    /// The id the vector was upserted under.
    pub id: String,
    /// Similarity score, higher is more relevant.
    pub score: f64,
    /// Metadata stored alongside the vector.
    pub metadata: Value,
}

/// Durable nearest-neighbour store.
pub trait VectorIndex: Send + Sync {
    /// Create the index if absent and wait until it is ready.
    ///
    /// Idempotent. Fails with `SchemaMismatch` if the index exists with a
    /// different dimension.
    fn ensure_index(
        &self,
        dimension: usize,
        metric: DistanceMetric,
    ) -> impl Future<Output = Result<(), IndexError>> + Send;

    /// Insert or replace the vector stored under `id`.
    fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: Value,
    ) -> impl Future<Output = Result<(), IndexError>> + Send;

    /// Return up to `top_k` nearest neighbours of `vector`.
    ///
    /// Implementations may push the capability and mode constraints of
    /// `filters` down to the store; callers re-check them.
    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> impl Future<Output = Result<Vec<IndexMatch>, IndexError>> + Send;

    /// Remove the vector stored under `id`. Missing ids are not an error.
    fn delete(&self, id: &str) -> impl Future<Output = Result<(), IndexError>> + Send;

    /// Point-in-time statistics.
    fn stats(&self) -> impl Future<Output = Result<IndexStats, IndexError>> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`VectorIndex`] for dynamic dispatch.
///
/// Every `VectorIndex` implements it through the blanket impl below.
pub trait DynVectorIndex: Send + Sync {
    fn ensure_index_boxed(
        &self,
        dimension: usize,
        metric: DistanceMetric,
    ) -> BoxFuture<'_, Result<(), IndexError>>;

    fn upsert_boxed<'a>(
        &'a self,
        id: &'a str,
        vector: Vec<f32>,
        metadata: Value,
    ) -> BoxFuture<'a, Result<(), IndexError>>;

    fn query_boxed<'a>(
        &'a self,
        vector: &'a [f32],
        top_k: usize,
        filters: &'a SearchFilters,
    ) -> BoxFuture<'a, Result<Vec<IndexMatch>, IndexError>>;

    fn delete_boxed<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), IndexError>>;

    fn stats_boxed(&self) -> BoxFuture<'_, Result<IndexStats, IndexError>>;
}

impl<T: VectorIndex> DynVectorIndex for T {
    fn ensure_index_boxed(
        &self,
        dimension: usize,
        metric: DistanceMetric,
    ) -> BoxFuture<'_, Result<(), IndexError>> {
        Box::pin(self.ensure_index(dimension, metric))
    }

    fn upsert_boxed<'a>(
        &'a self,
        id: &'a str,
        vector: Vec<f32>,
        metadata: Value,
    ) -> BoxFuture<'a, Result<(), IndexError>> {
        Box::pin(self.upsert(id, vector, metadata))
    }

    fn query_boxed<'a>(
        &'a self,
        vector: &'a [f32],
        top_k: usize,
        filters: &'a SearchFilters,
    ) -> BoxFuture<'a, Result<Vec<IndexMatch>, IndexError>> {
        Box::pin(self.query(vector, top_k, filters))
    }

    fn delete_boxed<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), IndexError>> {
        Box::pin(self.delete(id))
    }

    fn stats_boxed(&self) -> BoxFuture<'_, Result<IndexStats, IndexError>> {
        Box::pin(self.stats())
    }
}

/// Whether stored metadata passes the capability and mode constraints.
///
/// Reads the `capabilities`, `inputModes` and `outputModes` string arrays
/// written by the indexer; missing arrays count as empty.
pub fn metadata_matches(filters: &SearchFilters, metadata: &Value) -> bool {
    filters.matches_agent(
        &string_array(metadata, "capabilities"),
        &string_array(metadata, "inputModes"),
        &string_array(metadata, "outputModes"),
    )
}

/// String elements of the array stored under `key`.
pub fn string_array<'a>(metadata: &'a Value, key: &str) -> Vec<&'a str> {
    metadata
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Sort by descending score, then ascending id.
pub(crate) fn rank_matches(matches: &mut [IndexMatch]) {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

// ---------------------------------------------------------------------------
// InMemoryIndex
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct VectorEntry {
    embedding: Vec<f32>,
    metadata: Value,
}

#[derive(Debug, Default)]
struct IndexState {
    schema: Option<(usize, DistanceMetric)>,
    entries: HashMap<String, VectorEntry>,
}

/// Process-local vector index using brute-force scoring.
///
/// Thread-safe via interior RwLock. Writes are visible to the next query,
/// so there is no consistency window after upsert or delete.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIndex {
    state: Arc<RwLock<IndexState>>,
}

impl InMemoryIndex {
    /// Create a new empty, unprovisioned index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the number of vectors currently stored.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Return true if the index contains no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the vector stored under `id`, if any.
    pub fn get_vector(&self, id: &str) -> Option<Vec<f32>> {
        self.state
            .read()
            .ok()?
            .entries
            .get(id)
            .map(|e| e.embedding.clone())
    }

    fn schema(&self) -> Result<(usize, DistanceMetric), IndexError> {
        self.state
            .read()
            .map_err(|e| IndexError::Unavailable(format!("Lock poisoned: {}", e)))?
            .schema
            .ok_or(IndexError::NotProvisioned)
    }
}

impl VectorIndex for InMemoryIndex {
    async fn ensure_index(&self, dimension: usize, metric: DistanceMetric) -> Result<(), IndexError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| IndexError::Unavailable(format!("Lock poisoned: {}", e)))?;
        match state.schema {
            Some((existing, _)) if existing != dimension => Err(IndexError::SchemaMismatch {
                existing,
                requested: dimension,
            }),
            Some(_) => Ok(()),
            None => {
                state.schema = Some((dimension, metric));
                Ok(())
            }
        }
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<(), IndexError> {
        let (dimension, _) = self.schema()?;
        if vector.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }
        let mut state = self
            .state
            .write()
            .map_err(|e| IndexError::Unavailable(format!("Lock poisoned: {}", e)))?;
        state.entries.insert(
            id.to_string(),
            VectorEntry {
                embedding: vector,
                metadata,
            },
        );
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<IndexMatch>, IndexError> {
        let (dimension, metric) = self.schema()?;
        if vector.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }

        let state = self
            .state
            .read()
            .map_err(|e| IndexError::Unavailable(format!("Lock poisoned: {}", e)))?;

        let mut scored: Vec<IndexMatch> = state
            .entries
            .iter()
            .filter(|(_, entry)| metadata_matches(filters, &entry.metadata))
            .map(|(id, entry)| IndexMatch {
                id: id.clone(),
                score: score(metric, vector, &entry.embedding),
                metadata: entry.metadata.clone(),
            })
            .collect();

        rank_matches(&mut scored);
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete(&self, id: &str) -> Result<(), IndexError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| IndexError::Unavailable(format!("Lock poisoned: {}", e)))?;
        state.entries.remove(id);
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats, IndexError> {
        let state = self
            .state
            .read()
            .map_err(|e| IndexError::Unavailable(format!("Lock poisoned: {}", e)))?;
        Ok(IndexStats {
            vector_count: state.entries.len() as u64,
            dimension: state.schema.map(|(d, _)| d),
            metric: state.schema.map(|(_, m)| m),
        })
    }
}

fn score(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f64 {
    match metric {
        DistanceMetric::Cosine => cosine_similarity(a, b),
        DistanceMetric::DotProduct => dot(a, b),
        DistanceMetric::Euclidean => {
            DistanceMetric::similarity_from_distance(euclidean_distance(a, b))
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum()
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| ((*x as f64) - (*y as f64)).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot(a, b) / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn provisioned(dimension: usize, metric: DistanceMetric) -> InMemoryIndex {
        let index = InMemoryIndex::new();
        index.ensure_index(dimension, metric).await.unwrap();
        index
    }

    fn unit(dimension: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dimension];
        v[hot] = 1.0;
        v
    }

    #[tokio::test]
    async fn test_upsert_and_query() {
        let index = provisioned(4, DistanceMetric::Cosine).await;
        index.upsert("a", unit(4, 0), json!({"name": "A"})).await.unwrap();
        index.upsert("b", unit(4, 1), json!({"name": "B"})).await.unwrap();

        let hits = index
            .query(&unit(4, 0), 5, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert!(hits[1].score.abs() < 1e-9);
        assert_eq!(hits[0].metadata["name"], "A");
    }

    #[tokio::test]
    async fn test_ensure_index_idempotent() {
        let index = provisioned(4, DistanceMetric::Cosine).await;
        index.ensure_index(4, DistanceMetric::Cosine).await.unwrap();
        let stats = index.stats().await.unwrap();
        assert_eq!(stats.dimension, Some(4));
        assert_eq!(stats.metric, Some(DistanceMetric::Cosine));
    }

    #[tokio::test]
    async fn test_ensure_index_schema_mismatch() {
        let index = provisioned(4, DistanceMetric::Cosine).await;
        let err = index.ensure_index(8, DistanceMetric::Cosine).await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::SchemaMismatch {
                existing: 4,
                requested: 8
            }
        ));
    }

    #[tokio::test]
    async fn test_upsert_before_provisioning() {
        let index = InMemoryIndex::new();
        let err = index.upsert("a", vec![1.0], json!({})).await.unwrap_err();
        assert!(matches!(err, IndexError::NotProvisioned));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_keeps_prior_vector() {
        let index = provisioned(3, DistanceMetric::Cosine).await;
        index.upsert("a", vec![1.0, 0.0, 0.0], json!({"v": 1})).await.unwrap();

        let err = index
            .upsert("a", vec![0.0, 1.0], json!({"v": 2}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(index.get_vector("a"), Some(vec![1.0, 0.0, 0.0]));
        let hits = index
            .query(&[1.0, 0.0, 0.0], 1, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits[0].metadata["v"], 1);
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let index = provisioned(2, DistanceMetric::Cosine).await;
        index.upsert("a", vec![1.0, 0.0], json!({"v": 1})).await.unwrap();
        index.upsert("a", vec![0.0, 1.0], json!({"v": 2})).await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get_vector("a"), Some(vec![0.0, 1.0]));
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let index = provisioned(2, DistanceMetric::Cosine).await;
        index.upsert("a", vec![1.0, 0.0], json!({})).await.unwrap();
        index.delete("a").await.unwrap();
        index.delete("a").await.unwrap();
        index.delete("never-existed").await.unwrap();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_ties_broken_by_ascending_id() {
        let index = provisioned(2, DistanceMetric::Cosine).await;
        for id in ["charlie", "alpha", "bravo"] {
            index.upsert(id, vec![1.0, 1.0], json!({})).await.unwrap();
        }
        let hits = index
            .query(&[1.0, 1.0], 10, &SearchFilters::default())
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "bravo", "charlie"]);
    }

    #[tokio::test]
    async fn test_query_respects_top_k() {
        let index = provisioned(2, DistanceMetric::Cosine).await;
        for i in 0..10 {
            index
                .upsert(&format!("id-{}", i), vec![1.0, i as f32], json!({}))
                .await
                .unwrap();
        }
        let hits = index
            .query(&[1.0, 0.0], 3, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, "id-0");
    }

    #[tokio::test]
    async fn test_query_pushes_down_filters() {
        let index = provisioned(2, DistanceMetric::Cosine).await;
        index
            .upsert(
                "streamer",
                vec![1.0, 0.0],
                json!({"capabilities": ["streaming"], "inputModes": ["text"]}),
            )
            .await
            .unwrap();
        index
            .upsert("plain", vec![1.0, 0.0], json!({"capabilities": []}))
            .await
            .unwrap();

        let filters = SearchFilters {
            capabilities: ["streaming".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let hits = index.query(&[1.0, 0.0], 10, &filters).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "streamer");
    }

    #[tokio::test]
    async fn test_euclidean_scores() {
        let index = provisioned(2, DistanceMetric::Euclidean).await;
        index.upsert("same", vec![3.0, 4.0], json!({})).await.unwrap();
        index.upsert("far", vec![0.0, 0.0], json!({})).await.unwrap();
        let hits = index
            .query(&[3.0, 4.0], 2, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits[0].id, "same");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        // distance 5 -> 1 / 6
        assert!((hits[1].score - 1.0 / 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_dot_product_scores() {
        let index = provisioned(2, DistanceMetric::DotProduct).await;
        index.upsert("big", vec![2.0, 2.0], json!({})).await.unwrap();
        index.upsert("small", vec![1.0, 0.0], json!({})).await.unwrap();
        let hits = index
            .query(&[1.0, 1.0], 2, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits[0].id, "big");
        assert!((hits[0].score - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_query_dimension_checked() {
        let index = provisioned(3, DistanceMetric::Cosine).await;
        let err = index
            .query(&[1.0], 1, &SearchFilters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_dyn_index_delegates() {
        let index: Arc<dyn DynVectorIndex> = Arc::new(InMemoryIndex::new());
        index
            .ensure_index_boxed(2, DistanceMetric::Cosine)
            .await
            .unwrap();
        index
            .upsert_boxed("a", vec![1.0, 0.0], json!({}))
            .await
            .unwrap();
        assert_eq!(index.stats_boxed().await.unwrap().vector_count, 1);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0; 4], &[1.0; 4]), 0.0);
    }

    #[test]
    fn test_cosine_similarity_length_mismatch() {
        assert_eq!(cosine_similarity(&[1.0; 3], &[1.0; 4]), 0.0);
    }

    #[test]
    fn test_metadata_matches_missing_arrays() {
        let filters = SearchFilters {
            input_mode: Some("text".to_string()),
            ..Default::default()
        };
        assert!(!metadata_matches(&filters, &json!({})));
        assert!(metadata_matches(&SearchFilters::default(), &json!({})));
        assert!(metadata_matches(&filters, &json!({"inputModes": ["text"]})));
    }
}

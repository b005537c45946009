//! Route handler functions for all API endpoints.
//!
//! Each handler extracts parameters via axum extractors, calls the shared
//! `AgentIndexer`, and returns JSON.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use agentdex_core::types::{AgentCard, SearchFilters, SearchResponse};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request types
// =============================================================================

/// Body of `POST /search`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
    #[serde(default)]
    pub filters: SearchFilters,
}

/// Query string of `GET /search`.
///
/// `capability` takes a comma-separated list.
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub top_k: Option<usize>,
    pub capability: Option<String>,
    pub input_mode: Option<String>,
    pub output_mode: Option<String>,
    pub min_score: Option<f64>,
}

impl SearchParams {
    fn filters(&self) -> SearchFilters {
        SearchFilters {
            capabilities: self
                .capability
                .as_deref()
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            input_mode: self.input_mode.clone(),
            output_mode: self.output_mode.clone(),
            min_score: self.min_score,
        }
    }
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub vector_count: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexAgentResponse {
    pub agent_id: String,
    pub indexed: bool,
}

// =============================================================================
// Handler functions
// =============================================================================

/// GET /health - liveness plus index reachability.
///
/// Always 200; `status` is "degraded" when the index cannot report stats.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, vector_count) = match state.indexer.stats().await {
        Ok(stats) => ("healthy", Some(stats.vector_count)),
        Err(e) => {
            tracing::warn!(error = %e, "Index stats unavailable");
            ("degraded", None)
        }
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        vector_count,
    })
}

/// POST /agents - index or re-index an agent card.
pub async fn index_agent(
    State(state): State<AppState>,
    Json(card): Json<AgentCard>,
) -> Result<(StatusCode, Json<IndexAgentResponse>), ApiError> {
    state.indexer.index_agent(&card).await?;
    Ok((
        StatusCode::CREATED,
        Json(IndexAgentResponse {
            agent_id: card.id,
            indexed: true,
        }),
    ))
}

/// DELETE /agents/{id} - remove an agent. Unknown ids succeed.
pub async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.indexer.remove_agent(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /search - semantic search with a JSON body.
pub async fn search_post(
    State(state): State<AppState>,
    Json(body): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let top_k = body.top_k.unwrap_or(state.config.search.default_top_k);
    let response = state
        .indexer
        .search(&body.query, &body.filters, top_k)
        .await?;
    Ok(Json(response))
}

/// GET /search - semantic search from query parameters.
pub async fn search_get(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let q = params
        .q
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("Parameter 'q' is required for search".to_string()))?;
    let top_k = params.top_k.unwrap_or(state.config.search.default_top_k);
    let response = state.indexer.search(q, &params.filters(), top_k).await?;
    Ok(Json(response))
}

//! Local stand-ins for the embedding and vector-store HTTP APIs.
//!
//! Each fake is an axum router bound to an ephemeral port, with shared state
//! the tests can script and inspect.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// Serve `router` on 127.0.0.1 and return its base URL.
pub async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

// =============================================================================
// Embeddings
// =============================================================================

#[derive(Debug, Default)]
pub struct EmbeddingsState {
    pub dimensions: usize,
    /// Statuses returned, in order, before requests start succeeding.
    pub failures: VecDeque<StatusCode>,
    pub calls: u32,
    pub last_authorization: Option<String>,
    pub last_body: Option<Value>,
}

pub type SharedEmbeddings = Arc<Mutex<EmbeddingsState>>;

/// Deterministic, non-zero vector derived from the input bytes.
pub fn fake_vector(input: &str, dimensions: usize) -> Vec<f32> {
    let seed: u64 = input.bytes().map(u64::from).sum();
    (0..dimensions)
        .map(|i| ((seed * (i as u64 + 1)) % 101) as f32 / 101.0 + 0.01)
        .collect()
}

async fn embeddings(
    State(state): State<SharedEmbeddings>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut s = state.lock().unwrap();
    s.calls += 1;
    s.last_authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    s.last_body = Some(body.clone());

    if let Some(status) = s.failures.pop_front() {
        let mut response =
            (status, Json(json!({"error": {"message": "scripted failure"}}))).into_response();
        if status == StatusCode::TOO_MANY_REQUESTS {
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from_static("0"));
        }
        return response;
    }

    let input = body["input"].as_str().unwrap_or_default();
    Json(json!({
        "object": "list",
        "data": [{"object": "embedding", "index": 0, "embedding": fake_vector(input, s.dimensions)}],
        "model": body["model"],
    }))
    .into_response()
}

pub async fn spawn_embeddings(state: EmbeddingsState) -> (String, SharedEmbeddings) {
    let shared = Arc::new(Mutex::new(state));
    let router = Router::new()
        .route("/v1/embeddings", post(embeddings))
        .with_state(Arc::clone(&shared));
    let base = spawn(router).await;
    (format!("{}/v1", base), shared)
}

// =============================================================================
// Vector store
// =============================================================================

#[derive(Debug, Clone)]
pub struct FakeIndex {
    pub dimension: usize,
    pub metric: String,
    /// Describe calls left that still report the index as initializing.
    pub polls_until_ready: u32,
}

#[derive(Debug, Default)]
pub struct PineconeState {
    pub index: Option<FakeIndex>,
    /// Polls a freshly created index spends initializing.
    pub create_polls: u32,
    /// Describe calls that report 404 even when the index exists, as when
    /// another writer creates it concurrently.
    pub describe_misses: u32,
    pub host: String,
    pub vectors: BTreeMap<String, (Vec<f32>, Value)>,
    pub describe_calls: u32,
    pub create_calls: u32,
    pub create_body: Option<Value>,
    pub upsert_calls: u32,
    pub upsert_failures: VecDeque<StatusCode>,
    pub last_query: Option<Value>,
    pub last_api_key: Option<String>,
}

pub type SharedPinecone = Arc<Mutex<PineconeState>>;

fn record_key(s: &mut PineconeState, headers: &HeaderMap) {
    s.last_api_key = headers
        .get("api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
}

async fn describe_index(
    State(state): State<SharedPinecone>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut s = state.lock().unwrap();
    record_key(&mut s, &headers);
    s.describe_calls += 1;
    let host = s.host.clone();
    if s.describe_misses > 0 {
        s.describe_misses -= 1;
        return (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response();
    }
    let Some(index) = s.index.as_mut() else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response();
    };
    let ready = index.polls_until_ready == 0;
    index.polls_until_ready = index.polls_until_ready.saturating_sub(1);
    Json(json!({
        "name": name,
        "dimension": index.dimension,
        "metric": index.metric,
        "host": if ready { host } else { String::new() },
        "status": {"ready": ready, "state": if ready { "Ready" } else { "Initializing" }},
    }))
    .into_response()
}

async fn create_index(
    State(state): State<SharedPinecone>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut s = state.lock().unwrap();
    record_key(&mut s, &headers);
    s.create_calls += 1;
    if s.index.is_some() {
        return (StatusCode::CONFLICT, Json(json!({"error": "already exists"}))).into_response();
    }
    s.index = Some(FakeIndex {
        dimension: body["dimension"].as_u64().unwrap_or_default() as usize,
        metric: body["metric"].as_str().unwrap_or("cosine").to_string(),
        polls_until_ready: s.create_polls,
    });
    s.create_body = Some(body);
    (StatusCode::CREATED, Json(json!({}))).into_response()
}

async fn upsert(
    State(state): State<SharedPinecone>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut s = state.lock().unwrap();
    record_key(&mut s, &headers);
    s.upsert_calls += 1;
    if let Some(status) = s.upsert_failures.pop_front() {
        let mut response = (status, Json(json!({"error": "scripted failure"}))).into_response();
        if status == StatusCode::TOO_MANY_REQUESTS {
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from_static("0"));
        }
        return response;
    }
    let mut count = 0;
    for v in body["vectors"].as_array().cloned().unwrap_or_default() {
        let id = v["id"].as_str().unwrap_or_default().to_string();
        let values: Vec<f32> = serde_json::from_value(v["values"].clone()).unwrap_or_default();
        s.vectors.insert(id, (values, v["metadata"].clone()));
        count += 1;
    }
    Json(json!({"upsertedCount": count})).into_response()
}

fn raw_score(metric: &str, a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    match metric {
        "euclidean" => a
            .iter()
            .zip(b)
            .map(|(x, y)| (f64::from(*x) - f64::from(*y)).powi(2))
            .sum(),
        "dotproduct" => dot,
        _ => {
            let na: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
            let nb: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
            dot / (na * nb)
        }
    }
}

async fn query(State(state): State<SharedPinecone>, Json(body): Json<Value>) -> Response {
    let mut s = state.lock().unwrap();
    s.last_query = Some(body.clone());
    let metric = s
        .index
        .as_ref()
        .map(|i| i.metric.clone())
        .unwrap_or_default();
    let vector: Vec<f32> = serde_json::from_value(body["vector"].clone()).unwrap_or_default();
    let top_k = body["topK"].as_u64().unwrap_or(10) as usize;

    let mut matches: Vec<(String, f64, Value)> = s
        .vectors
        .iter()
        .map(|(id, (values, metadata))| (id.clone(), raw_score(&metric, &vector, values), metadata.clone()))
        .collect();
    if metric == "euclidean" {
        matches.sort_by(|a, b| a.1.total_cmp(&b.1));
    } else {
        matches.sort_by(|a, b| b.1.total_cmp(&a.1));
    }
    matches.truncate(top_k);

    let matches: Vec<Value> = matches
        .into_iter()
        .map(|(id, score, metadata)| json!({"id": id, "score": score, "metadata": metadata}))
        .collect();
    Json(json!({"matches": matches, "namespace": body["namespace"]})).into_response()
}

async fn delete(State(state): State<SharedPinecone>, Json(body): Json<Value>) -> Response {
    let mut s = state.lock().unwrap();
    for id in body["ids"].as_array().cloned().unwrap_or_default() {
        if let Some(id) = id.as_str() {
            s.vectors.remove(id);
        }
    }
    Json(json!({})).into_response()
}

async fn describe_index_stats(State(state): State<SharedPinecone>) -> Response {
    let s = state.lock().unwrap();
    Json(json!({
        "dimension": s.index.as_ref().map(|i| i.dimension),
        "totalVectorCount": s.vectors.len(),
        "namespaces": {},
    }))
    .into_response()
}

/// One server plays both the control plane and the index host.
pub async fn spawn_pinecone(state: PineconeState) -> (String, SharedPinecone) {
    let shared = Arc::new(Mutex::new(state));
    let router = Router::new()
        .route("/indexes", post(create_index))
        .route("/indexes/{name}", get(describe_index))
        .route("/vectors/upsert", post(upsert))
        .route("/query", post(query))
        .route("/vectors/delete", post(delete))
        .route("/describe_index_stats", post(describe_index_stats))
        .with_state(Arc::clone(&shared));
    let base = spawn(router).await;
    shared.lock().unwrap().host = base.clone();
    (base, shared)
}

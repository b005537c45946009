//! Agent indexing and semantic search orchestration.
//!
//! `AgentIndexer` turns agent cards into embedding text plus filterable
//! metadata, writes them to a vector index, and answers natural-language
//! queries with ranked, filtered results.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use agentdex_core::config::SearchConfig;
use agentdex_core::error::{AgentdexError, Result};
use agentdex_core::types::{
    AgentCard, DistanceMetric, IndexStats, SearchFilters, SearchResponse, SearchResult,
};

use crate::embedding::{DynEmbeddingProvider, EmbeddingProvider};
use crate::index::{metadata_matches, string_array, DynVectorIndex, IndexMatch, VectorIndex};

/// Layout version of the text built by [`embedding_text`]. Stored with each
/// vector so stale entries can be found after the layout changes.
pub const EMBEDDING_TEXT_VERSION: u32 = 1;

/// Per-call deadline and cancellation.
///
/// Both are honoured until the index write is issued. After that the write
/// runs to completion so a call never leaves a partial mutation behind.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Deadline fixed at the start of one operation.
struct Budget<'a> {
    ctx: &'a CallContext,
    deadline: Option<(Instant, Duration)>,
}

impl<'a> Budget<'a> {
    fn start(ctx: &'a CallContext) -> Self {
        Self {
            ctx,
            deadline: ctx.timeout.map(|t| (Instant::now() + t, t)),
        }
    }

    fn check(&self) -> Result<()> {
        if self.ctx.cancel.is_cancelled() {
            return Err(AgentdexError::Cancelled);
        }
        match self.deadline {
            Some((deadline, timeout)) if Instant::now() >= deadline => {
                Err(AgentdexError::TimedOut(timeout))
            }
            _ => Ok(()),
        }
    }

    /// Run a stage that may be abandoned on cancellation or timeout.
    async fn run<T>(&self, stage: impl Future<Output = Result<T>>) -> Result<T> {
        self.check()?;
        let guarded = async {
            tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => Err(AgentdexError::Cancelled),
                result = stage => result,
            }
        };
        match self.deadline {
            Some((deadline, timeout)) => tokio::time::timeout_at(deadline, guarded)
                .await
                .map_err(|_| AgentdexError::TimedOut(timeout))?,
            None => guarded.await,
        }
    }
}

/// Indexes agent cards and answers semantic queries over them.
///
/// Cheap to clone; clones share the embedding provider and vector index.
#[derive(Clone)]
pub struct AgentIndexer {
    embedder: Arc<dyn DynEmbeddingProvider>,
    index: Arc<dyn DynVectorIndex>,
    metric: DistanceMetric,
    config: SearchConfig,
}

impl std::fmt::Debug for AgentIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentIndexer")
            .field("dimensions", &self.embedder.dimensions())
            .field("metric", &self.metric)
            .field("config", &self.config)
            .finish()
    }
}

impl AgentIndexer {
    pub fn new(
        embedder: impl EmbeddingProvider + 'static,
        index: impl VectorIndex + 'static,
        metric: DistanceMetric,
        config: SearchConfig,
    ) -> Self {
        Self::new_dyn(Arc::new(embedder), Arc::new(index), metric, config)
    }

    /// Build from providers selected at runtime.
    pub fn new_dyn(
        embedder: Arc<dyn DynEmbeddingProvider>,
        index: Arc<dyn DynVectorIndex>,
        metric: DistanceMetric,
        config: SearchConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            metric,
            config,
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    pub fn search_config(&self) -> &SearchConfig {
        &self.config
    }

    /// Context carrying the configured per-call timeout (`0` disables it).
    pub fn default_context(&self) -> CallContext {
        match self.config.call_timeout_secs {
            0 => CallContext::new(),
            secs => CallContext::new().with_timeout(Duration::from_secs(secs)),
        }
    }

    // -------------------------------------------------------------------------
    // Provisioning
    // -------------------------------------------------------------------------

    /// Make sure the index exists with the embedder's dimension.
    ///
    /// Not subject to `call_timeout_secs`; the index bounds provisioning
    /// with its own timeout and reports `ProvisioningTimeout`.
    pub async fn ensure_ready(&self) -> Result<()> {
        self.ensure_ready_with(&CallContext::new()).await
    }

    pub async fn ensure_ready_with(&self, ctx: &CallContext) -> Result<()> {
        let budget = Budget::start(ctx);
        let dimension = self.embedder.dimensions();
        budget
            .run(async {
                self.index
                    .ensure_index_boxed(dimension, self.metric)
                    .await
                    .map_err(AgentdexError::from)
            })
            .await?;
        info!(dimension, metric = %self.metric, "Agent index ready");
        Ok(())
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        Ok(self.index.stats_boxed().await?)
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Embed and store an agent card, replacing any previous entry with the
    /// same id.
    pub async fn index_agent(&self, card: &AgentCard) -> Result<()> {
        self.index_agent_with(card, &self.default_context()).await
    }

    pub async fn index_agent_with(&self, card: &AgentCard, ctx: &CallContext) -> Result<()> {
        card.validate().map_err(AgentdexError::InvalidAgentCard)?;
        let budget = Budget::start(ctx);

        let text = embedding_text(card);
        let vector = budget
            .run(async {
                self.embedder
                    .embed_boxed(&text)
                    .await
                    .map_err(|e| AgentdexError::indexing_failed(&card.id, e))
            })
            .await?;

        let metadata = agent_metadata(card);

        // Commit point: once issued, the upsert is not abandoned.
        budget.check()?;
        self.index
            .upsert_boxed(&card.id, vector, metadata)
            .await
            .map_err(|e| AgentdexError::indexing_failed(&card.id, e))?;

        info!(
            agent_id = %card.id,
            skills = card.skills.len(),
            "Indexed agent"
        );
        Ok(())
    }

    /// Delete an agent's entry. Removing an unknown id succeeds.
    pub async fn remove_agent(&self, agent_id: &str) -> Result<()> {
        self.remove_agent_with(agent_id, &self.default_context()).await
    }

    pub async fn remove_agent_with(&self, agent_id: &str, ctx: &CallContext) -> Result<()> {
        if agent_id.trim().is_empty() {
            return Err(AgentdexError::InvalidAgentCard(
                "'id' must not be empty".to_string(),
            ));
        }
        Budget::start(ctx).check()?;
        self.index.delete_boxed(agent_id).await?;
        info!(agent_id, "Removed agent");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Search
    // -------------------------------------------------------------------------

    /// Rank agents by semantic similarity to `query`.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<SearchResponse> {
        self.search_with(query, filters, top_k, &self.default_context())
            .await
    }

    pub async fn search_with(
        &self,
        query: &str,
        filters: &SearchFilters,
        top_k: usize,
        ctx: &CallContext,
    ) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(AgentdexError::InvalidQuery("query must not be empty".to_string()));
        }
        if top_k == 0 {
            return Err(AgentdexError::InvalidQuery("topK must be at least 1".to_string()));
        }
        if filters.min_score.is_some_and(f64::is_nan) {
            return Err(AgentdexError::InvalidQuery("minScore must be a number".to_string()));
        }

        let top_k = top_k.min(self.config.max_top_k.max(1));
        let fetch_k = top_k.saturating_mul(self.config.overfetch_factor.max(1));
        let budget = Budget::start(ctx);

        let vector = budget
            .run(async {
                self.embedder
                    .embed_boxed(query)
                    .await
                    .map_err(AgentdexError::from)
            })
            .await?;
        let candidates = budget
            .run(async {
                self.index
                    .query_boxed(&vector, fetch_k, filters)
                    .await
                    .map_err(AgentdexError::from)
            })
            .await?;

        let fetched = candidates.len();
        let matched: Vec<IndexMatch> = candidates
            .into_iter()
            .filter(|m| filters.accepts_score(m.score) && metadata_matches(filters, &m.metadata))
            .collect();
        let total = matched.len();

        let terms = query_terms(query);
        let results: Vec<SearchResult> = matched
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(i, m)| to_result(i + 1, m, filters, &terms))
            .collect();

        debug!(
            top_k,
            fetched,
            total,
            returned = results.len(),
            "Search complete"
        );

        Ok(SearchResponse {
            query: query.to_string(),
            results,
            total,
            timestamp: Utc::now(),
        })
    }
}

// =============================================================================
// Card projection
// =============================================================================

/// Text embedded for a card: name, description, then each skill as
/// `"{name}: {description}"` followed by its tags, one item per line.
pub fn embedding_text(card: &AgentCard) -> String {
    let mut lines: Vec<String> = vec![card.name.clone(), card.description.clone()];
    for skill in &card.skills {
        lines.push(format!("{}: {}", skill.name, skill.description));
        if !skill.tags.is_empty() {
            let tags: Vec<&str> = skill.tags.iter().map(String::as_str).collect();
            lines.push(format!("tags: {}", tags.join(", ")));
        }
    }
    lines.join("\n")
}

/// Metadata stored alongside the card's vector.
///
/// Absent optional fields are omitted rather than stored as null.
pub fn agent_metadata(card: &AgentCard) -> Value {
    let skill_names: Vec<&str> = card.skills.iter().map(|s| s.name.as_str()).collect();
    let skill_tags: BTreeSet<&str> = card
        .skills
        .iter()
        .flat_map(|s| s.tags.iter().map(String::as_str))
        .collect();

    let mut metadata = Map::new();
    metadata.insert("name".into(), json!(card.name));
    metadata.insert("description".into(), json!(card.description));
    metadata.insert("url".into(), json!(card.url));
    metadata.insert("capabilities".into(), json!(card.capabilities));
    metadata.insert("inputModes".into(), json!(card.all_input_modes()));
    metadata.insert("outputModes".into(), json!(card.all_output_modes()));
    metadata.insert("skillNames".into(), json!(skill_names));
    metadata.insert("skillTags".into(), json!(skill_tags));
    if let Some(index) = card.erc8004_index {
        metadata.insert("erc8004Index".into(), json!(index));
    }
    metadata.insert("embeddingVersion".into(), json!(EMBEDDING_TEXT_VERSION));
    Value::Object(metadata)
}

/// Lowercased query words of three or more characters, first occurrence
/// order.
fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in query.split(|c: char| !c.is_alphanumeric()) {
        if word.chars().count() < 3 {
            continue;
        }
        let word = word.to_lowercase();
        if !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}

fn match_reasons(score: f64, metadata: &Value, filters: &SearchFilters, terms: &[String]) -> Vec<String> {
    let mut reasons = vec![format!("semantic similarity {:.3}", score)];

    let capabilities = string_array(metadata, "capabilities");
    for capability in &filters.capabilities {
        if capabilities.contains(&capability.as_str()) {
            reasons.push(format!("has capability '{}'", capability));
        }
    }
    if let Some(ref mode) = filters.input_mode {
        if string_array(metadata, "inputModes").contains(&mode.as_str()) {
            reasons.push(format!("accepts input mode '{}'", mode));
        }
    }
    if let Some(ref mode) = filters.output_mode {
        if string_array(metadata, "outputModes").contains(&mode.as_str()) {
            reasons.push(format!("produces output mode '{}'", mode));
        }
    }

    let name = metadata
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    let tags: Vec<String> = string_array(metadata, "skillTags")
        .into_iter()
        .map(str::to_lowercase)
        .collect();
    for term in terms {
        if name.contains(term.as_str()) {
            reasons.push(format!("name matches '{}'", term));
        } else if tags.iter().any(|t| t.contains(term.as_str())) {
            reasons.push(format!("skill tag matches '{}'", term));
        }
    }
    reasons
}

fn to_result(rank: usize, m: IndexMatch, filters: &SearchFilters, terms: &[String]) -> SearchResult {
    let text = |key: &str| {
        m.metadata
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let name = match text("name") {
        n if n.is_empty() => m.id.clone(),
        n => n,
    };
    let capabilities = m
        .metadata
        .get("capabilities")
        .and_then(Value::as_array)
        .map(|_| {
            string_array(&m.metadata, "capabilities")
                .into_iter()
                .map(str::to_string)
                .collect()
        });

    SearchResult {
        rank,
        name,
        description: text("description"),
        url: text("url"),
        score: m.score,
        capabilities,
        match_reasons: match_reasons(m.score, &m.metadata, filters, terms),
        erc8004_index: m.metadata.get("erc8004Index").and_then(Value::as_u64),
        agent_id: m.id,
    }
}

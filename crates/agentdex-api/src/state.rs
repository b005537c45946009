//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use agentdex_core::config::AgentdexConfig;
use agentdex_vector::AgentIndexer;

/// Shared application state.
///
/// Cloned per request; every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AgentdexConfig>,
    pub indexer: AgentIndexer,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AgentdexConfig, indexer: AgentIndexer) -> Self {
        Self {
            config: Arc::new(config),
            indexer,
            start_time: Instant::now(),
        }
    }
}

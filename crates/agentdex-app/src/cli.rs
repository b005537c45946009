//! CLI argument definitions for the agentdex binary.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use agentdex_core::types::SearchFilters;

/// agentdex - semantic search over a registry of AI agents.
#[derive(Parser, Debug)]
#[command(name = "agentdex", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides `RUST_LOG`.
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision the index and start the HTTP API.
    Serve {
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
        #[arg(long = "host")]
        host: Option<String>,
    },
    /// Index agent cards from JSON files.
    Index {
        #[arg(required = true)]
        cards: Vec<PathBuf>,
    },
    /// Search indexed agents and print the response as JSON.
    Search {
        query: String,
        #[arg(short = 'k', long = "top-k")]
        top_k: Option<usize>,
        /// Required capability; repeat for match-any.
        #[arg(long = "capability")]
        capabilities: Vec<String>,
        #[arg(long = "input-mode")]
        input_mode: Option<String>,
        #[arg(long = "output-mode")]
        output_mode: Option<String>,
        #[arg(long = "min-score")]
        min_score: Option<f64>,
    },
    /// Remove an agent from the index.
    Remove { id: String },
    /// Validate the configuration file and required environment.
    CheckConfig,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > AGENTDEX_CONFIG env var > ~/.agentdex/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("AGENTDEX_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }
}

/// Resolve the API server port.
///
/// Priority: --port flag > AGENTDEX_PORT env var > config file value.
pub fn resolve_port(flag: Option<u16>, config_port: u16) -> u16 {
    if let Some(p) = flag {
        return p;
    }
    if let Ok(val) = std::env::var("AGENTDEX_PORT") {
        if let Ok(p) = val.parse::<u16>() {
            return p;
        }
    }
    config_port
}

/// Build query filters from `search` subcommand flags.
pub fn search_filters(
    capabilities: &[String],
    input_mode: Option<String>,
    output_mode: Option<String>,
    min_score: Option<f64>,
) -> SearchFilters {
    SearchFilters {
        capabilities: capabilities.iter().cloned().collect(),
        input_mode,
        output_mode,
        min_score,
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".agentdex").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".agentdex").join("config.toml");
    }
    PathBuf::from("config.toml")
}

//! agentdex application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Read credentials from the environment
//! 3. Build the embedding provider, vector index, and agent indexer
//! 4. Run the requested subcommand (HTTP API, indexing, search, removal)

mod bootstrap;
mod cli;

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use agentdex_api::state::AppState;
use agentdex_core::config::{AgentdexConfig, Credentials};
use agentdex_core::error::AgentdexError;
use agentdex_core::types::AgentCard;
use agentdex_vector::AgentIndexer;

use cli::{CliArgs, Command};

type BoxError = Box<dyn std::error::Error>;

/// Filter priority: `--log-level`, then `RUST_LOG`, then the config file.
fn init_tracing(flag: Option<&str>, config_level: &str) {
    let filter = match flag {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config_level)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn check_config(config: &AgentdexConfig, path: &Path) -> Result<(), BoxError> {
    println!("config file: {}", path.display());
    println!(
        "embedding:   {:?} ({}, {} dims)",
        config.embedding.provider, config.embedding.model, config.embedding.dimensions
    );
    println!(
        "index:       {:?} ({} metric)",
        config.index.provider, config.index.metric
    );
    match Credentials::from_env(config) {
        Ok(_) => {
            println!("environment: ok");
            Ok(())
        }
        Err(AgentdexError::MissingConfig(keys)) => {
            for key in &keys {
                println!("missing:     {}", key);
            }
            Err(AgentdexError::MissingConfig(keys).into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn index_cards(indexer: &AgentIndexer, paths: &[PathBuf]) -> Result<(), BoxError> {
    let mut failed = 0usize;
    for path in paths {
        let result = async {
            let content = std::fs::read_to_string(path)?;
            let card: AgentCard = serde_json::from_str(&content)?;
            indexer.index_agent(&card).await?;
            Ok::<_, AgentdexError>(card.id)
        }
        .await;

        match result {
            Ok(id) => println!("indexed {} ({})", id, path.display()),
            Err(e) => {
                failed += 1;
                tracing::error!(path = %path.display(), error = %e, "Failed to index agent card");
            }
        }
    }
    if failed > 0 {
        return Err(format!("{} of {} agent cards failed to index", failed, paths.len()).into());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config = AgentdexConfig::load_or_default(&config_file)?;
    init_tracing(args.log_level.as_deref(), &config.general.log_level);

    tracing::info!(
        path = %config_file.display(),
        "Starting agentdex v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Command::CheckConfig = args.command {
        return check_config(&config, &config_file);
    }

    let credentials = Credentials::from_env(&config)?;
    let indexer = bootstrap::build_indexer(&config, &credentials)?;
    indexer.ensure_ready().await?;

    match args.command {
        Command::Serve { port, host } => {
            let port = cli::resolve_port(port, config.server.port);
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let state = AppState::new(config, indexer);
            agentdex_api::start_server(&host, port, state).await?;
        }
        Command::Index { cards } => {
            index_cards(&indexer, &cards).await?;
        }
        Command::Search {
            query,
            top_k,
            capabilities,
            input_mode,
            output_mode,
            min_score,
        } => {
            let filters = cli::search_filters(&capabilities, input_mode, output_mode, min_score);
            let top_k = top_k.unwrap_or(config.search.default_top_k);
            let response = indexer.search(&query, &filters, top_k).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Remove { id } => {
            indexer.remove_agent(&id).await?;
            println!("removed {}", id);
        }
        Command::CheckConfig => {}
    }

    Ok(())
}

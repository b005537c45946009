pub mod config;
pub mod error;
pub mod types;

pub use config::{AgentdexConfig, Credentials, Secret};
pub use error::{AgentdexError, EmbeddingError, IndexError, Result};
pub use types::*;

//! agentdex vector crate - embedding providers, vector indexes, and the
//! agent indexer that ties them together.
//!
//! Ships OpenAI-compatible embeddings and a Pinecone-backed index for
//! production, plus a deterministic mock embedder and an in-memory index
//! for tests and local runs.

pub mod embedding;
pub mod index;
pub mod indexer;
pub mod pinecone;
pub mod retry;

pub use embedding::{DynEmbeddingProvider, EmbeddingProvider, MockEmbedding, OpenAiEmbedding};
pub use index::{DynVectorIndex, InMemoryIndex, IndexMatch, VectorIndex};
pub use indexer::{embedding_text, AgentIndexer, CallContext, EMBEDDING_TEXT_VERSION};
pub use pinecone::PineconeIndex;
pub use retry::{RetryPolicy, Retryable};

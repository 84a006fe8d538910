//! Shared knowledge base with tag indexing and retention-based eviction.

mod store;

pub use store::{KnowledgeQuery, KnowledgeStats, KnowledgeStore, SharedKnowledge};

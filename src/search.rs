//! Semantic search collaborator. No store ships with the crate; callers plug
//! one in through [`VectorSearch`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    /// Similarity in `[0, 1]`, higher is closer.
    pub score: f64,
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Up to `k` hits, best first.
    async fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<SearchHit>>;
}

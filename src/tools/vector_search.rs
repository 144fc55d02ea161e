use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{parse_params, schema_for, Tool, ToolResult};
use crate::nlp::types::Params;
use crate::search::VectorSearch;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct VectorSearchParams {
    #[schemars(description = "Natural language description of what to find")]
    pub query: String,

    #[schemars(description = "Number of results")]
    #[serde(default = "default_k")]
    pub k: u32,
}

fn default_k() -> u32 {
    5
}

pub struct VectorSearchTool {
    search: Arc<dyn VectorSearch>,
}

impl VectorSearchTool {
    pub fn new(search: Arc<dyn VectorSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Tool for VectorSearchTool {
    fn name(&self) -> &'static str {
        "vector_search"
    }

    fn description(&self) -> &'static str {
        "Find notes semantically related to a query."
    }

    fn schema(&self) -> Value {
        schema_for::<VectorSearchParams>()
    }

    async fn execute(&self, params: &Params) -> ToolResult {
        let params: VectorSearchParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let hits = match self.search.search(&params.query, params.k as usize).await {
            Ok(hits) => hits,
            Err(e) => return ToolResult::error(format!("vector search failed: {e}")),
        };

        let content = if hits.is_empty() {
            format!("Nothing related to '{}' found.", params.query)
        } else {
            hits.iter()
                .enumerate()
                .map(|(i, hit)| {
                    let snippet: String = hit.text.chars().take(100).collect();
                    format!("{}. {} ({:.2}): {}", i + 1, hit.id, hit.score, snippet.trim())
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        ToolResult::success(content)
            .with_metadata("matches", ids)
            .with_metadata("count", hits.len())
            .with_metadata("hits", serde_json::to_value(&hits).unwrap_or_default())
    }
}

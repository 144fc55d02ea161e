use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{parse_params, schema_for, Tool, ToolResult};
use crate::nlp::types::Params;
use crate::vault::Vault;

/// Longest line excerpt shown per hit.
const EXCERPT_CHARS: usize = 120;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchNotesParams {
    #[schemars(description = "Text to look for (case-insensitive)")]
    pub query: String,

    #[schemars(description = "Maximum number of matching notes")]
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    10
}

/// Case-insensitive full-text scan over every markdown note.
pub struct SearchNotesTool {
    vault: Arc<dyn Vault>,
}

impl SearchNotesTool {
    pub fn new(vault: Arc<dyn Vault>) -> Self {
        Self { vault }
    }
}

#[async_trait]
impl Tool for SearchNotesTool {
    fn name(&self) -> &'static str {
        "search_notes"
    }

    fn description(&self) -> &'static str {
        "Search the text of all notes for a phrase."
    }

    fn schema(&self) -> Value {
        schema_for::<SearchNotesParams>()
    }

    async fn execute(&self, params: &Params) -> ToolResult {
        let params: SearchNotesParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let needle = params.query.trim().to_lowercase();
        if needle.is_empty() {
            return ToolResult::error("query must not be empty");
        }

        let notes = match self.vault.list("**/*.md").await {
            Ok(notes) => notes,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let mut matches: Vec<String> = Vec::new();
        let mut lines: Vec<String> = Vec::new();
        for note in notes {
            if matches.len() >= params.limit as usize {
                break;
            }
            let text = match self.vault.read(&note).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(note = %note, error = %e, "skipping unreadable note");
                    continue;
                }
            };
            let hits: Vec<(usize, &str)> = text
                .lines()
                .enumerate()
                .filter(|(_, line)| line.to_lowercase().contains(&needle))
                .collect();
            if hits.is_empty() && !note.to_lowercase().contains(&needle) {
                continue;
            }
            for (i, line) in &hits {
                let excerpt: String = line.trim().chars().take(EXCERPT_CHARS).collect();
                lines.push(format!("{note}:{}: {excerpt}", i + 1));
            }
            if hits.is_empty() {
                lines.push(format!("{note}: (name matches)"));
            }
            matches.push(note);
        }

        let count = matches.len();
        let content = if count == 0 {
            format!("No notes match '{}'.", params.query)
        } else {
            format!("Found '{}' in {count} note(s):\n{}", params.query, lines.join("\n"))
        };
        ToolResult::success(content)
            .with_metadata("matches", matches)
            .with_metadata("count", count)
            .with_metadata("query", params.query)
    }
}

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{parse_params, schema_for, Tool, ToolResult};
use crate::nlp::types::Params;
use crate::vault::Vault;

/// Most note names printed in the listing itself.
const MAX_LISTED: usize = 50;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ListNotesParams {
    #[schemars(description = "Glob pattern, e.g. 'projects/**/*.md'. Defaults to every markdown note.")]
    pub pattern: Option<String>,
}

pub struct ListNotesTool {
    vault: Arc<dyn Vault>,
    default_pattern: String,
}

impl ListNotesTool {
    pub fn new(vault: Arc<dyn Vault>, default_pattern: String) -> Self {
        Self {
            vault,
            default_pattern,
        }
    }
}

#[async_trait]
impl Tool for ListNotesTool {
    fn name(&self) -> &'static str {
        "list_notes"
    }

    fn description(&self) -> &'static str {
        "List notes in the vault, optionally filtered by a glob pattern."
    }

    fn schema(&self) -> Value {
        schema_for::<ListNotesParams>()
    }

    async fn execute(&self, params: &Params) -> ToolResult {
        let params: ListNotesParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let pattern = params.pattern.unwrap_or_else(|| self.default_pattern.clone());

        let notes = match self.vault.list(&pattern).await {
            Ok(notes) => notes,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let folders: BTreeSet<&str> = notes
            .iter()
            .filter_map(|n| n.rsplit_once('/').map(|(dir, _)| dir))
            .collect();

        let count = notes.len();
        let mut content = format!("{count} note(s) in {} folder(s)", folders.len());
        for note in notes.iter().take(MAX_LISTED) {
            content.push_str("\n- ");
            content.push_str(note);
        }
        if count > MAX_LISTED {
            content.push_str(&format!("\n... and {} more", count - MAX_LISTED));
        }

        let folders: Vec<String> = folders.into_iter().map(str::to_string).collect();
        ToolResult::success(content)
            .with_metadata("count", count)
            .with_metadata("folders", folders)
            .with_metadata("notes", notes)
            .with_metadata("pattern", pattern)
    }
}

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{parse_params, schema_for, Tool, ToolResult};
use crate::nlp::types::Params;
use crate::vault::{UpdateMode, Vault};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct UpdateNoteParams {
    #[schemars(description = "Vault-relative path of an existing note")]
    pub note_path: String,

    #[schemars(description = "Text to add or replace with")]
    pub content: String,

    #[schemars(description = "How to combine with the existing text. Defaults to append.")]
    pub mode: Option<UpdateMode>,

    #[schemars(description = "Write a timestamped .bak copy first")]
    pub backup: Option<bool>,
}

pub struct UpdateNoteTool {
    vault: Arc<dyn Vault>,
    backup_by_default: bool,
}

impl UpdateNoteTool {
    pub fn new(vault: Arc<dyn Vault>, backup_by_default: bool) -> Self {
        Self {
            vault,
            backup_by_default,
        }
    }
}

#[async_trait]
impl Tool for UpdateNoteTool {
    fn name(&self) -> &'static str {
        "update_note"
    }

    fn description(&self) -> &'static str {
        "Append to, prepend to or replace the text of an existing note."
    }

    fn schema(&self) -> Value {
        schema_for::<UpdateNoteParams>()
    }

    async fn execute(&self, params: &Params) -> ToolResult {
        let params: UpdateNoteParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let mode = params.mode.unwrap_or_default();
        let backup = params.backup.unwrap_or(self.backup_by_default);

        match self
            .vault
            .update(&params.note_path, &params.content, mode, backup)
            .await
        {
            Ok(backup_path) => ToolResult::success(format!(
                "Updated '{}' ({mode})",
                params.note_path
            ))
            .with_metadata("note_path", params.note_path)
            .with_metadata("mode", mode.as_str())
            .with_metadata("backup", backup_path),
            Err(e) => ToolResult::error(e.to_string()).with_metadata("note_path", params.note_path),
        }
    }
}

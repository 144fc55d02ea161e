use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{parse_params, schema_for, Tool, ToolResult};
use crate::nlp::types::Params;
use crate::vault::Vault;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ReadNoteParams {
    #[schemars(description = "Vault-relative path of the note, ending in .md")]
    pub note_path: String,
}

pub struct ReadNoteTool {
    vault: Arc<dyn Vault>,
}

impl ReadNoteTool {
    pub fn new(vault: Arc<dyn Vault>) -> Self {
        Self { vault }
    }
}

#[async_trait]
impl Tool for ReadNoteTool {
    fn name(&self) -> &'static str {
        "read_note"
    }

    fn description(&self) -> &'static str {
        "Read the full text of a note in the vault."
    }

    fn schema(&self) -> Value {
        schema_for::<ReadNoteParams>()
    }

    async fn execute(&self, params: &Params) -> ToolResult {
        let params: ReadNoteParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        match self.vault.read(&params.note_path).await {
            Ok(text) => {
                let chars = text.chars().count();
                ToolResult::success(text)
                    .with_metadata("note_path", params.note_path)
                    .with_metadata("chars", chars)
            }
            Err(e) => ToolResult::error(e.to_string()).with_metadata("note_path", params.note_path),
        }
    }
}

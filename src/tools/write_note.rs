use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{parse_params, schema_for, Tool, ToolResult};
use crate::nlp::inference::ensure_md;
use crate::nlp::types::Params;
use crate::vault::Vault;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct WriteNoteParams {
    #[schemars(description = "Vault-relative path for the new note")]
    pub note_path: String,

    #[schemars(description = "Markdown content of the note")]
    pub content: String,

    #[schemars(description = "Replace the note if it already exists. Defaults to false.")]
    pub overwrite: Option<bool>,
}

pub struct WriteNoteTool {
    vault: Arc<dyn Vault>,
}

impl WriteNoteTool {
    pub fn new(vault: Arc<dyn Vault>) -> Self {
        Self { vault }
    }
}

#[async_trait]
impl Tool for WriteNoteTool {
    fn name(&self) -> &'static str {
        "write_note"
    }

    fn description(&self) -> &'static str {
        "Create a new note (or overwrite one when overwrite=true)."
    }

    fn schema(&self) -> Value {
        schema_for::<WriteNoteParams>()
    }

    async fn execute(&self, params: &Params) -> ToolResult {
        let params: WriteNoteParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let path = ensure_md(&params.note_path);
        let overwrite = params.overwrite.unwrap_or(false);

        match self.vault.write(&path, &params.content, overwrite).await {
            Ok(()) => ToolResult::success(format!("Created note '{path}'"))
                .with_metadata("note_path", path)
                .with_metadata("chars", params.content.chars().count())
                .with_metadata("overwrite", overwrite),
            Err(e) => ToolResult::error(e.to_string()).with_metadata("note_path", path),
        }
    }
}

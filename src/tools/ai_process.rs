use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{parse_params, schema_for, Tool, ToolResult};
use crate::llm::{GenerationRequest, LlmError, TextGenerator};
use crate::nlp::types::Params;
use crate::vault::Vault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AiTask {
    Summarize,
    Enhance,
    ExtractInsights,
    GenerateQuestions,
}

impl AiTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summarize => "summarize",
            Self::Enhance => "enhance",
            Self::ExtractInsights => "extract_insights",
            Self::GenerateQuestions => "generate_questions",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            Self::Summarize => "Summarize the following note in a few short paragraphs. Keep the key facts.",
            Self::Enhance => {
                "Improve the following note: fix structure and wording, add headings where useful, keep the author's meaning. Return markdown."
            }
            Self::ExtractInsights => "List the key insights and takeaways from the following note as bullet points.",
            Self::GenerateQuestions => "Write five study questions that test understanding of the following note.",
        }
    }

    pub fn prompt(&self, note_path: &str, content: &str) -> String {
        format!("{}\n\nNote: {note_path}\n\n---\n{content}\n---", self.instruction())
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AiProcessParams {
    #[schemars(description = "Vault-relative path of the note to process")]
    pub note_path: String,

    #[schemars(description = "What to do with the note")]
    pub task: AiTask,

    #[schemars(description = "Text to process instead of reading the note")]
    pub content: Option<String>,

    #[schemars(description = "Model to use instead of the configured default")]
    pub model: Option<String>,
}

/// Runs an AI task over a note through the configured text generator.
pub struct AiProcessTool {
    vault: Arc<dyn Vault>,
    generator: Arc<dyn TextGenerator>,
    temperature: f32,
    max_tokens: u32,
}

impl AiProcessTool {
    pub fn new(
        vault: Arc<dyn Vault>,
        generator: Arc<dyn TextGenerator>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            vault,
            generator,
            temperature,
            max_tokens,
        }
    }
}

#[async_trait]
impl Tool for AiProcessTool {
    fn name(&self) -> &'static str {
        "ai_process"
    }

    fn description(&self) -> &'static str {
        "Summarize, enhance, extract insights from or generate questions about a note."
    }

    fn schema(&self) -> Value {
        schema_for::<AiProcessParams>()
    }

    async fn execute(&self, params: &Params) -> ToolResult {
        let params: AiProcessParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let content = match params.content {
            Some(content) => content,
            None => match self.vault.read(&params.note_path).await {
                Ok(text) => text,
                Err(e) => return ToolResult::error(e.to_string()).with_metadata("note_path", params.note_path),
            },
        };
        if content.trim().is_empty() {
            return ToolResult::error(format!("note '{}' is empty", params.note_path));
        }

        let model = params
            .model
            .unwrap_or_else(|| self.generator.default_model().to_string());
        let request = GenerationRequest {
            prompt: params.task.prompt(&params.note_path, &content),
            model: Some(model.clone()),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        tracing::info!(task = params.task.as_str(), note = %params.note_path, model = %model, "ai_process");
        match self.generator.generate(&request).await {
            Ok(output) => ToolResult::success(output)
                .with_metadata("note_path", params.note_path)
                .with_metadata("task", params.task.as_str())
                .with_metadata("model", model),
            Err(e @ LlmError::Unreachable { .. }) => {
                ToolResult::error(format!("AI backend unavailable (connection refused or timeout): {e}"))
            }
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

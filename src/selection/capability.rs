//! Static descriptions of what each tool can do.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::nlp::extractor::{optional_parameters, required_parameters};
use crate::nlp::types::Intent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCapability {
    pub tool_name: String,
    pub intent_compatibility: BTreeSet<Intent>,
    pub required_parameters: Vec<String>,
    pub optional_parameters: Vec<String>,
}

impl ToolCapability {
    fn new(tool_name: &str, intents: &[Intent]) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            intent_compatibility: intents.iter().copied().collect(),
            required_parameters: required_parameters(tool_name).iter().map(|s| s.to_string()).collect(),
            optional_parameters: optional_parameters(tool_name).iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn supports(&self, intent: Intent) -> bool {
        self.intent_compatibility.contains(&intent)
    }

    pub fn accepts(&self, parameter: &str) -> bool {
        self.required_parameters.iter().any(|p| p == parameter)
            || self.optional_parameters.iter().any(|p| p == parameter)
    }
}

/// One entry per tool kind, in registry order.
pub fn default_capabilities() -> Vec<ToolCapability> {
    vec![
        ToolCapability::new("read_note", &[Intent::ReadNote]),
        ToolCapability::new("write_note", &[Intent::WriteNote]),
        ToolCapability::new("update_note", &[Intent::UpdateNote]),
        ToolCapability::new("search_notes", &[Intent::SearchNotes]),
        ToolCapability::new("vector_search", &[Intent::SearchNotes, Intent::VectorSearch]),
        ToolCapability::new("list_notes", &[Intent::ListNotes, Intent::VaultInfo, Intent::VaultStats]),
        ToolCapability::new(
            "ai_process",
            &[
                Intent::Summarize,
                Intent::Enhance,
                Intent::ExtractInsights,
                Intent::GenerateQuestions,
            ],
        ),
    ]
}

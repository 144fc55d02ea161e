//! Core language-processing type definitions.
//!
//! Defines [`Intent`] (the closed set of user goals), the per-stage results
//! ([`IntentResult`], [`ParameterResult`], [`ProcessingResult`]) and the full
//! pipeline output [`EnhancedProcessingResult`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open parameter/entity map. Ordered so that results render deterministically.
pub type Params = serde_json::Map<String, Value>;

/// Confidence at or above which an intent classification counts as confident.
pub const CONFIDENT_THRESHOLD: f64 = 0.7;

/// What the user is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ReadNote,
    WriteNote,
    UpdateNote,
    DeleteNote,
    SearchNotes,
    VectorSearch,
    ListNotes,
    Summarize,
    Enhance,
    ExtractInsights,
    GenerateQuestions,
    VaultInfo,
    VaultStats,
    Help,
    Greeting,
    Unknown,
}

impl Intent {
    /// Every intent, in declaration order.
    pub const ALL: [Intent; 16] = [
        Intent::ReadNote,
        Intent::WriteNote,
        Intent::UpdateNote,
        Intent::DeleteNote,
        Intent::SearchNotes,
        Intent::VectorSearch,
        Intent::ListNotes,
        Intent::Summarize,
        Intent::Enhance,
        Intent::ExtractInsights,
        Intent::GenerateQuestions,
        Intent::VaultInfo,
        Intent::VaultStats,
        Intent::Help,
        Intent::Greeting,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadNote => "read_note",
            Self::WriteNote => "write_note",
            Self::UpdateNote => "update_note",
            Self::DeleteNote => "delete_note",
            Self::SearchNotes => "search_notes",
            Self::VectorSearch => "vector_search",
            Self::ListNotes => "list_notes",
            Self::Summarize => "summarize",
            Self::Enhance => "enhance",
            Self::ExtractInsights => "extract_insights",
            Self::GenerateQuestions => "generate_questions",
            Self::VaultInfo => "vault_info",
            Self::VaultStats => "vault_stats",
            Self::Help => "help",
            Self::Greeting => "greeting",
            Self::Unknown => "unknown",
        }
    }

    /// Verb phrase for replies, e.g. "I couldn't {describe}".
    pub fn describe(&self) -> &'static str {
        match self {
            Self::ReadNote => "read a note",
            Self::WriteNote => "create a note",
            Self::UpdateNote => "update a note",
            Self::DeleteNote => "delete a note",
            Self::SearchNotes => "search your notes",
            Self::VectorSearch => "run a semantic search",
            Self::ListNotes => "list your notes",
            Self::Summarize => "summarize a note",
            Self::Enhance => "enhance a note",
            Self::ExtractInsights => "extract insights from a note",
            Self::GenerateQuestions => "generate questions about a note",
            Self::VaultInfo => "show vault info",
            Self::VaultStats => "show vault statistics",
            Self::Help => "get help",
            Self::Greeting => "say hello",
            Self::Unknown => "do that",
        }
    }

    /// Intents whose primary argument is a note path.
    pub fn targets_note(&self) -> bool {
        matches!(
            self,
            Self::ReadNote
                | Self::WriteNote
                | Self::UpdateNote
                | Self::DeleteNote
                | Self::Summarize
                | Self::Enhance
                | Self::ExtractInsights
                | Self::GenerateQuestions
        )
    }

    /// Intents whose primary argument is a search query.
    pub fn is_search(&self) -> bool {
        matches!(self, Self::SearchNotes | Self::VectorSearch)
    }

    /// Intents handled by the AI-processing tool.
    pub fn is_ai_processing(&self) -> bool {
        matches!(
            self,
            Self::Summarize | Self::Enhance | Self::ExtractInsights | Self::GenerateQuestions
        )
    }

    /// Intents that change vault contents.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::WriteNote | Self::UpdateNote | Self::DeleteNote)
    }

    /// The entity key a regex capture is stored under for this intent.
    pub fn entity_key(&self) -> Option<&'static str> {
        if self.targets_note() {
            Some("note_path")
        } else if self.is_search() {
            Some("query")
        } else {
            None
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Intent::ALL
            .iter()
            .copied()
            .find(|intent| intent.as_str() == s)
            .ok_or_else(|| format!("unknown intent: {s}"))
    }
}

/// Output of the intent classifier for one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f64,
    pub entities: Params,
    pub raw_text: String,
}

impl IntentResult {
    pub fn unknown(raw_text: &str) -> Self {
        Self {
            intent: Intent::Unknown,
            confidence: 0.0,
            entities: Params::new(),
            raw_text: raw_text.to_string(),
        }
    }

    pub fn is_confident(&self) -> bool {
        self.confidence >= CONFIDENT_THRESHOLD
    }

    /// Entity value as a string, if present and a string.
    pub fn entity_str(&self, key: &str) -> Option<&str> {
        self.entities.get(key).and_then(Value::as_str)
    }
}

/// Output of the parameter extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterResult {
    pub tool_name: Option<String>,
    pub parameters: Params,
    pub confidence: f64,
    pub missing_required: Vec<String>,
}

impl ParameterResult {
    pub fn is_complete(&self) -> bool {
        self.missing_required.is_empty()
    }
}

/// A vault file that resembles the filename the user asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMatch {
    pub path: String,
    pub similarity: f64,
}

/// Output of the base [`LanguageProcessor`](super::processor::LanguageProcessor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub intent: Intent,
    pub tool_name: Option<String>,
    pub parameters: Params,
    pub confidence: f64,
    pub missing_parameters: Vec<String>,
    pub suggestions: Vec<String>,
    pub needs_confirmation: bool,
    pub context_used: bool,
}

impl ProcessingResult {
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

/// Full pipeline output of the enhanced processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedProcessingResult {
    #[serde(flatten)]
    pub base: ProcessingResult,
    /// Other plausible intents, highest confidence first.
    pub alternative_interpretations: Vec<(Intent, f64)>,
    pub suggested_completions: Vec<String>,
    /// Ranked fuzzy filename matches.
    pub file_matches: Vec<FileMatch>,
    pub inferred_parameters: Params,
    pub requires_clarification: bool,
    pub clarification_question: Option<String>,
    pub user_learning_data: Params,
}

impl EnhancedProcessingResult {
    pub fn from_base(base: ProcessingResult) -> Self {
        Self {
            base,
            alternative_interpretations: Vec::new(),
            suggested_completions: Vec::new(),
            file_matches: Vec::new(),
            inferred_parameters: Params::new(),
            requires_clarification: false,
            clarification_question: None,
            user_learning_data: Params::new(),
        }
    }

    /// Zero-confidence fallback used when the pipeline cannot produce a result.
    pub fn fallback(suggestions: Vec<String>) -> Self {
        Self::from_base(ProcessingResult {
            intent: Intent::Unknown,
            tool_name: None,
            parameters: Params::new(),
            confidence: 0.0,
            missing_parameters: Vec::new(),
            suggestions,
            needs_confirmation: false,
            context_used: false,
        })
    }

    pub fn intent(&self) -> Intent {
        self.base.intent
    }

    pub fn confidence(&self) -> f64 {
        self.base.confidence
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.base.tool_name.as_deref()
    }

    pub fn parameters(&self) -> &Params {
        &self.base.parameters
    }

    /// The preprocessed message this result was built from.
    pub fn message(&self) -> &str {
        self.user_learning_data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Ready to run without asking the user anything.
    pub fn is_executable(&self) -> bool {
        self.base.tool_name.is_some()
            && self.base.missing_parameters.is_empty()
            && self.base.confidence > 0.6
    }
}

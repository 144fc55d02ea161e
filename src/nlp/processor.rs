//! Base language processor: classification, context merge and parameter
//! extraction composed into one [`ProcessingResult`].

use std::path::PathBuf;

use super::classifier::IntentClassifier;
use super::context::{ConversationContext, Turn};
use super::extractor::ParameterExtractor;
use super::types::{Intent, IntentResult, ProcessingResult};

/// Below this, write/update/delete ask before running.
pub const CONFIRMATION_THRESHOLD: f64 = 0.8;

pub struct LanguageProcessor {
    classifier: IntentClassifier,
    extractor: ParameterExtractor,
    context: ConversationContext,
}

impl LanguageProcessor {
    pub fn new(vault_root: Option<PathBuf>) -> Self {
        Self {
            classifier: IntentClassifier::new(),
            extractor: ParameterExtractor::new(vault_root),
            context: ConversationContext::new(),
        }
    }

    pub fn with_context_window(mut self, turns: usize) -> Self {
        self.context = ConversationContext::with_max_turns(turns);
        self
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    pub fn extractor(&self) -> &ParameterExtractor {
        &self.extractor
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ConversationContext {
        &mut self.context
    }

    /// Classify, merge context and extract parameters for one message.
    pub fn process(&self, text: &str) -> ProcessingResult {
        let intent = self.classifier.classify(text);
        self.process_intent(&intent)
    }

    /// Same as [`process`](Self::process) for an already classified message.
    pub fn process_intent(&self, intent: &IntentResult) -> ProcessingResult {
        let enhanced = self.context.enhance_intent_result(intent);
        let context_used = enhanced.entities != intent.entities;
        let params = self.extractor.extract_parameters(&enhanced);

        let confidence = enhanced.confidence.min(params.confidence);
        let suggestions = params
            .missing_required
            .iter()
            .map(|name| missing_parameter_hint(enhanced.intent, name))
            .collect();

        ProcessingResult {
            intent: enhanced.intent,
            tool_name: params.tool_name,
            parameters: params.parameters,
            confidence,
            missing_parameters: params.missing_required,
            suggestions,
            needs_confirmation: enhanced.intent.is_mutating() && confidence < CONFIRMATION_THRESHOLD,
            context_used,
        }
    }

    /// Remember a finished exchange so later messages can refer back to it.
    pub fn record_exchange(&mut self, intent: &IntentResult, response: &str, tool_calls: Vec<String>) {
        self.context.add_turn(Turn::new(intent, response, tool_calls));
    }
}

/// Prompt text asking the user for a missing parameter.
pub fn missing_parameter_hint(intent: Intent, parameter: &str) -> String {
    match parameter {
        "note_path" => match intent {
            Intent::WriteNote => "What should the new note be called?".to_string(),
            _ => "Which note? Try e.g. 'read project-ideas.md'.".to_string(),
        },
        "content" => "What should the note say? Try adding \"saying ...\".".to_string(),
        "query" => "What should I search for? Try e.g. 'search for rust traits'.".to_string(),
        "task" => "What should I do with the note: summarize, enhance, extract insights or generate questions?".to_string(),
        other => format!("Please provide a value for '{other}'."),
    }
}

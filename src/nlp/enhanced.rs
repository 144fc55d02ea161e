//! The full language pipeline.
//!
//! [`EnhancedLanguageProcessor::process_message`] runs, in order: text
//! preprocessing, intent classification, alternative interpretations,
//! parameter extraction (retrying with alternatives), parameter inference,
//! fuzzy file matching, context merge, suggestions and completions, the
//! clarification decision, final confidence, the confirmation flag and finally
//! per-user learning. Every step is infallible, so the pipeline always
//! returns a result; empty input becomes a zero-confidence `Unknown`.

use regex::Regex;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use super::context::ConversationContext;
use super::fuzzy::rank_file_matches;
use super::inference::{infer_content, infer_file_path, infer_query, infer_task};
use super::processor::{missing_parameter_hint, LanguageProcessor, CONFIRMATION_THRESHOLD};
use super::types::{
    EnhancedProcessingResult, FileMatch, Intent, IntentResult, ParameterResult, Params,
    ProcessingResult,
};
use crate::config::NlpConfig;
use crate::profile::{length_bucket, UserProfileStore};

/// Intents probed for alternative readings, with the prefix that provokes them.
const ALTERNATIVE_PROBES: &[(Intent, &str)] = &[
    (Intent::ReadNote, "read"),
    (Intent::SearchNotes, "search for"),
    (Intent::WriteNote, "create a note"),
    (Intent::Summarize, "summarize"),
];

const MIN_ALTERNATIVE_CONFIDENCE: f64 = 0.3;
const ALTERNATIVE_SCALE: f64 = 0.8;
const AMBIGUITY_GAP: f64 = 0.2;
const LOW_CONFIDENCE: f64 = 0.5;
const INFERRED_CONFIDENCE: f64 = 0.6;
/// A single fuzzy match at least this close replaces the stated path.
const SUBSTITUTE_SIMILARITY: f64 = 0.8;
const MAX_COMPLETIONS: usize = 3;

static BARE_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][\w]*(?:[-_][\w]+)+$").expect("valid regex")
});

const GENERIC_SUGGESTIONS: &[&str] = &[
    "Try 'list my notes' to see what is in the vault",
    "Try 'read <note name>' to open a note",
    "Try 'search for <topic>' to find notes",
    "Try 'summarize <note name>' for an AI summary",
];

pub struct EnhancedLanguageProcessor {
    base: LanguageProcessor,
    config: NlpConfig,
    vault_files: Vec<String>,
    profiles: Arc<dyn UserProfileStore>,
}

impl EnhancedLanguageProcessor {
    pub fn new(
        config: &NlpConfig,
        vault_root: Option<PathBuf>,
        profiles: Arc<dyn UserProfileStore>,
    ) -> Self {
        Self {
            base: LanguageProcessor::new(vault_root).with_context_window(config.context_window),
            config: config.clone(),
            vault_files: Vec::new(),
            profiles,
        }
    }

    /// Replace the snapshot of vault-relative note paths used for matching.
    pub fn set_vault_files(&mut self, files: Vec<String>) {
        self.vault_files = files;
    }

    pub fn vault_files(&self) -> &[String] {
        &self.vault_files
    }

    pub fn base(&self) -> &LanguageProcessor {
        &self.base
    }

    pub fn context(&self) -> &ConversationContext {
        self.base.context()
    }

    pub fn context_mut(&mut self) -> &mut ConversationContext {
        self.base.context_mut()
    }

    pub fn profiles(&self) -> &Arc<dyn UserProfileStore> {
        &self.profiles
    }

    /// Remember a finished exchange in the conversation context.
    pub fn record_exchange(&mut self, result: &EnhancedProcessingResult, response: &str, tools: Vec<String>) {
        let intent = IntentResult {
            intent: result.intent(),
            confidence: result.confidence(),
            entities: result.parameters().clone(),
            raw_text: result.message().to_string(),
        };
        if let Some(note) = result.base.param_str("note_path") {
            self.base.context_mut().record_note(note);
        }
        if let Some(query) = result.base.param_str("query") {
            self.base.context_mut().record_query(query);
        }
        self.base.record_exchange(&intent, response, tools);
    }

    /// Run the whole pipeline. Never fails: empty input comes back as an
    /// `Unknown` result with generic suggestions.
    pub fn process_message(&self, text: &str, user_id: Option<&str>) -> EnhancedProcessingResult {
        let processed = self.preprocess(text);
        if processed.is_empty() {
            return EnhancedProcessingResult::fallback(generic_suggestions());
        }

        let classified = self.base.classifier().classify(&processed);
        let alternatives = self.generate_alternatives(&processed, &classified);

        let context = self.base.context();
        let mut intent = context.enhance_intent_result(&classified);
        let context_used = intent.entities != classified.entities;

        // A confident rule hit already names the action; only weak readings
        // are re-read as alternatives.
        let mut params = self.base.extractor().extract_parameters(&intent);
        if !params.is_complete() && classified.confidence < self.config.confident_threshold {
            if let Some((alt_intent, alt_params)) = self.retry_with_alternatives(&intent, &params, &alternatives) {
                tracing::debug!(from = %intent.intent, to = %alt_intent.intent, "alternative reading completes parameters");
                intent = alt_intent;
                params = alt_params;
            }
        }

        let extracted_count = params.parameters.len();
        let inferred = self.infer_missing(&intent, &mut params, user_id);
        let note_path_inferred = inferred.contains_key("note_path");

        let file_matches = self.match_files(&mut params);

        let parameter_confidence = blended_confidence(params.confidence, extracted_count, inferred.len());
        let mut confidence = intent.confidence.min(parameter_confidence);
        if !file_matches.is_empty() {
            confidence += 0.1;
        }
        if params.tool_name.is_some() && params.missing_required.is_empty() {
            confidence += 0.05;
        }
        let confidence = confidence.min(1.0);

        let suggestions = self.suggestions(&intent, &params, &file_matches);
        let suggested_completions = self.completions(intent.intent, &file_matches);

        let clarification =
            self.clarification(&classified, &alternatives, &params, &file_matches, confidence);

        let needs_confirmation = intent.intent.is_mutating()
            && (confidence < CONFIRMATION_THRESHOLD || note_path_inferred);

        let user_learning_data = self.learn(&processed, intent.intent, &params, user_id);

        tracing::debug!(
            intent = %intent.intent,
            confidence,
            tool = params.tool_name.as_deref().unwrap_or("-"),
            missing = params.missing_required.len(),
            clarify = clarification.is_some(),
            "message processed"
        );

        EnhancedProcessingResult {
            base: ProcessingResult {
                intent: intent.intent,
                tool_name: params.tool_name,
                parameters: params.parameters,
                confidence,
                missing_parameters: params.missing_required,
                suggestions,
                needs_confirmation,
                context_used,
            },
            alternative_interpretations: alternatives,
            suggested_completions,
            file_matches,
            inferred_parameters: inferred,
            requires_clarification: clarification.is_some(),
            clarification_question: clarification,
            user_learning_data,
        }
    }

    // ── Pipeline steps ──────────────────────────────────────────────

    /// Collapse whitespace and give bare hyphenated or underscored names a
    /// `.md` suffix.
    fn preprocess(&self, text: &str) -> String {
        text.split_whitespace()
            .map(|token| {
                let bare = token.trim_end_matches(['?', '!', ',', '.']);
                if BARE_FILENAME_RE.is_match(bare) && self.looks_like_note(bare) {
                    token.replacen(bare, &format!("{bare}.md"), 1)
                } else {
                    token.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Without a vault snapshot every bare name qualifies; with one, the
    /// name has to resemble a real note.
    fn looks_like_note(&self, bare: &str) -> bool {
        if self.vault_files.is_empty() {
            return true;
        }
        let target = format!("{}.md", bare.to_lowercase());
        self.vault_files.iter().any(|path| {
            let name = path.rsplit('/').next().unwrap_or(path).to_lowercase();
            name == target || super::fuzzy::similarity(&name, &target) >= self.config.fuzzy_threshold
        })
    }

    fn generate_alternatives(&self, text: &str, primary: &IntentResult) -> Vec<(Intent, f64)> {
        let mut alternatives: Vec<(Intent, f64)> = ALTERNATIVE_PROBES
            .iter()
            .filter(|(intent, _)| *intent != primary.intent)
            .filter_map(|(intent, prefix)| {
                let probe = self.base.classifier().classify(&format!("{prefix} {text}"));
                (probe.intent == *intent && probe.confidence > MIN_ALTERNATIVE_CONFIDENCE)
                    .then(|| (*intent, probe.confidence * ALTERNATIVE_SCALE))
            })
            .collect();
        alternatives.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        alternatives.truncate(self.config.max_alternatives);
        alternatives
    }

    /// First alternative reading whose parameters are complete or strictly
    /// richer than the primary's.
    fn retry_with_alternatives(
        &self,
        primary: &IntentResult,
        primary_params: &ParameterResult,
        alternatives: &[(Intent, f64)],
    ) -> Option<(IntentResult, ParameterResult)> {
        let primary_value = primary
            .intent
            .entity_key()
            .and_then(|key| primary.entities.get(key))
            .cloned();

        alternatives.iter().find_map(|(intent, confidence)| {
            let mut entities = Params::new();
            if let (Some(key), Some(value)) = (intent.entity_key(), primary_value.clone()) {
                entities.insert(key.to_string(), value);
            }
            let candidate = IntentResult {
                intent: *intent,
                confidence: *confidence,
                entities,
                raw_text: primary.raw_text.clone(),
            };
            let params = self.base.extractor().extract_parameters(&candidate);
            let better = params.tool_name.is_some()
                && (params.is_complete() || params.parameters.len() > primary_params.parameters.len());
            better.then_some((candidate, params))
        })
    }

    /// Fill missing required parameters heuristically. Returns what was inferred.
    fn infer_missing(&self, intent: &IntentResult, params: &mut ParameterResult, user_id: Option<&str>) -> Params {
        let mut inferred = Params::new();
        let text = intent.raw_text.as_str();
        let recent = self.recent_file(user_id);

        for name in params.missing_required.clone() {
            let value = match name.as_str() {
                "note_path" => infer_file_path(text, &self.vault_files, recent.as_deref())
                    .map(|path| self.base.extractor().normalize_path(&path)),
                "query" => infer_query(text),
                "task" => infer_task(intent.intent).map(str::to_string),
                "content" => infer_content(text),
                _ => None,
            };
            if let Some(value) = value {
                inferred.insert(name.clone(), Value::String(value.clone()));
                params.parameters.insert(name.clone(), Value::String(value));
            }
        }
        params.missing_required.retain(|name| !inferred.contains_key(name));
        inferred
    }

    fn recent_file(&self, user_id: Option<&str>) -> Option<String> {
        if let Some(note) = &self.base.context().current_note {
            return Some(note.clone());
        }
        user_id
            .and_then(|id| self.profiles.get(id))
            .and_then(|profile| profile.recent_files.first().cloned())
    }

    /// Rank vault files against the note path. A single close match for a
    /// path that does not exist replaces it.
    fn match_files(&self, params: &mut ParameterResult) -> Vec<FileMatch> {
        let Some(target) = params.parameters.get("note_path").and_then(Value::as_str) else {
            return Vec::new();
        };
        let matches = rank_file_matches(
            target,
            &self.vault_files,
            self.config.fuzzy_threshold,
            self.config.max_file_matches,
        );

        let exists = self.vault_files.iter().any(|f| f == target);
        let close: Vec<&FileMatch> = matches
            .iter()
            .filter(|m| m.similarity >= SUBSTITUTE_SIMILARITY)
            .collect();
        if !exists && close.len() == 1 {
            let path = close[0].path.clone();
            tracing::debug!(from = target, to = %path, "note path resolved by fuzzy match");
            params.parameters.insert("note_path".into(), Value::String(path));
        }
        matches
    }

    fn suggestions(&self, intent: &IntentResult, params: &ParameterResult, matches: &[FileMatch]) -> Vec<String> {
        let mut suggestions = Vec::new();

        if intent.intent == Intent::Unknown {
            suggestions.extend(generic_suggestions());
            return suggestions;
        }

        let target = params.parameters.get("note_path").and_then(Value::as_str);
        for m in matches.iter().take(3) {
            if Some(m.path.as_str()) != target {
                suggestions.push(format!("Did you mean '{}'?", m.path));
            }
        }

        for name in &params.missing_required {
            suggestions.push(missing_parameter_hint(intent.intent, name));
            let context = self.base.context();
            match name.as_str() {
                "note_path" if !context.recent_notes.is_empty() => {
                    suggestions.push(format!("Recent notes: {}", context.recent_notes.join(", ")));
                }
                "query" if !context.recent_queries.is_empty() => {
                    suggestions.push(format!("Recent searches: {}", context.recent_queries.join(", ")));
                }
                _ => {}
            }
        }
        suggestions
    }

    /// Up to three short commands the user could type next.
    fn completions(&self, intent: Intent, matches: &[FileMatch]) -> Vec<String> {
        let verb = completion_verb(intent);
        let mut completions: Vec<String> = Vec::new();

        if let Some(verb) = verb {
            let files = matches
                .iter()
                .map(|m| m.path.clone())
                .chain(self.base.context().recent_notes.iter().cloned());
            for file in files {
                let completion = format!("{verb} {file}");
                if !completions.contains(&completion) {
                    completions.push(completion);
                }
            }
        } else if intent.is_search() {
            completions.extend(
                self.base
                    .context()
                    .recent_queries
                    .iter()
                    .map(|q| format!("search for {q}")),
            );
        } else if intent == Intent::Unknown {
            completions.extend(["list my notes", "search for <topic>", "help"].map(str::to_string));
        }

        completions.truncate(MAX_COMPLETIONS);
        completions
    }

    /// The question to ask before acting, if any. Checked in order:
    /// (a) a weak classification (below `confident_threshold`) whose best
    /// alternative scores within `AMBIGUITY_GAP`; a confident rule hit is
    /// never second-guessed. (b) Several file matches, none of which is the
    /// resolved path. (c) Low confidence with required parameters missing.
    fn clarification(
        &self,
        classified: &IntentResult,
        alternatives: &[(Intent, f64)],
        params: &ParameterResult,
        matches: &[FileMatch],
        confidence: f64,
    ) -> Option<String> {
        if classified.confidence < self.config.confident_threshold {
            if let Some((alt, alt_confidence)) = alternatives.first() {
                if (classified.confidence - alt_confidence).abs() < AMBIGUITY_GAP {
                    return Some(format!(
                        "Did you want to {} or {}?",
                        classified.intent.describe(),
                        alt.describe()
                    ));
                }
            }
        }

        // Similarity only compares file names, so an exact hit means the
        // resolved path itself is one of the matches.
        let target = params.parameters.get("note_path").and_then(Value::as_str);
        let exact = matches.iter().any(|m| Some(m.path.as_str()) == target);
        if matches.len() > 1 && !exact {
            let names: Vec<&str> = matches.iter().map(|m| m.path.as_str()).collect();
            return Some(format!("Which note did you mean: {}?", names.join(", ")));
        }

        if confidence < LOW_CONFIDENCE && !params.missing_required.is_empty() {
            return Some(format!(
                "I need a bit more information: {}. Could you clarify?",
                params.missing_required.join(", ")
            ));
        }
        None
    }

    /// Update the user's usage counters and summarize what was learned.
    fn learn(&self, text: &str, intent: Intent, params: &ParameterResult, user_id: Option<&str>) -> Params {
        let mut data = Params::new();
        data.insert("message".into(), Value::String(text.to_string()));
        let Some(user_id) = user_id else {
            return data;
        };

        let chars = text.chars().count();
        let note = params
            .parameters
            .get("note_path")
            .and_then(Value::as_str)
            .map(str::to_string);

        self.profiles.update(user_id, &mut |profile| {
            profile.record_intent(intent, chars);
            if let Some(note) = &note {
                profile.record_file_access(note);
            }
        });

        data.insert(
            "intent_pattern".into(),
            Value::String(format!("{}:{}", intent.as_str(), length_bucket(chars))),
        );
        data.insert("message_length".into(), json!(chars));
        if let Some(profile) = self.profiles.get(user_id) {
            data.insert("recent_files".into(), json!(profile.recent_files));
        }
        data
    }
}

fn generic_suggestions() -> Vec<String> {
    GENERIC_SUGGESTIONS.iter().map(|s| s.to_string()).collect()
}

/// Mean confidence once inferred parameters are counted at a fixed weight.
fn blended_confidence(extracted: f64, extracted_count: usize, inferred_count: usize) -> f64 {
    if inferred_count == 0 {
        return extracted;
    }
    let total = extracted * extracted_count as f64 + INFERRED_CONFIDENCE * inferred_count as f64;
    total / (extracted_count + inferred_count) as f64
}

fn completion_verb(intent: Intent) -> Option<&'static str> {
    match intent {
        Intent::ReadNote => Some("read"),
        Intent::UpdateNote => Some("update"),
        Intent::Summarize => Some("summarize"),
        Intent::Enhance => Some("enhance"),
        Intent::ExtractInsights => Some("extract insights from"),
        Intent::GenerateQuestions => Some("generate questions about"),
        _ => None,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::InMemoryProfileStore;

    fn processor(files: &[&str]) -> EnhancedLanguageProcessor {
        let mut p = EnhancedLanguageProcessor::new(
            &NlpConfig::default(),
            None,
            Arc::new(InMemoryProfileStore::new()),
        );
        p.set_vault_files(files.iter().map(|f| f.to_string()).collect());
        p
    }

    #[test]
    fn fuzzy_match_resolves_note_path() {
        let p = processor(&["daily-notes.md", "recipes.md"]);
        let r = p.process_message("read my daily notes", None);
        assert_eq!(r.intent(), Intent::ReadNote);
        assert_eq!(r.tool_name(), Some("read_note"));
        assert_eq!(r.base.param_str("note_path"), Some("daily-notes.md"));
        assert!(r.file_matches.iter().any(|m| m.path == "daily-notes.md"));
        assert!(r.is_executable());
    }

    #[test]
    fn whitespace_only_is_unknown_with_suggestions() {
        let r = processor(&[]).process_message("  \t ", None);
        assert_eq!(r.intent(), Intent::Unknown);
        assert_eq!(r.confidence(), 0.0);
        assert!(!r.base.suggestions.is_empty());
    }

    #[test]
    fn bare_hyphenated_name_gets_suffix() {
        let p = processor(&["project-ideas.md"]);
        assert_eq!(p.preprocess("open   project-ideas"), "open project-ideas.md");
        assert_eq!(p.preprocess("open ideas"), "open ideas");
    }

    #[test]
    fn unresolvable_path_stays_missing() {
        let p = processor(&["rust-ownership.md", "recipes.md"]);
        let r = p.process_message("summarize", None);
        assert_eq!(r.tool_name(), Some("ai_process"));
        assert_eq!(r.base.missing_parameters, vec!["note_path".to_string()]);
        assert!(!r.is_executable());
    }

    #[test]
    fn missing_path_is_inferred_from_vault_keywords() {
        let p = processor(&["rust-ownership.md", "recipes.md"]);
        let r = p.process_message("ownership insights", None);
        assert_eq!(r.intent(), Intent::ExtractInsights);
        assert_eq!(r.base.param_str("note_path"), Some("rust-ownership.md"));
        assert_eq!(r.inferred_parameters["note_path"], "rust-ownership.md");
        assert!(r.base.missing_parameters.is_empty());
    }

    #[test]
    fn several_near_matches_need_clarification() {
        let p = processor(&["meeting-2024-01.md", "meeting-2024-02.md"]);
        let r = p.process_message("read meeting-2024", None);
        assert!(r.file_matches.len() > 1);
        assert!(r.requires_clarification);
        assert!(r.clarification_question.unwrap().contains("meeting-2024-01.md"));
    }

    #[test]
    fn same_name_in_two_folders_needs_clarification() {
        let p = processor(&["work/todo.md", "home/todo.md"]);
        let r = p.process_message("read todo.md", None);
        assert_eq!(r.file_matches.len(), 2);
        assert!(r.requires_clarification);
        let question = r.clarification_question.clone().unwrap();
        assert!(question.contains("work/todo.md") && question.contains("home/todo.md"), "{question}");
        assert_eq!(r.base.param_str("note_path"), Some("todo.md"));

        let r = processor(&["todo.md", "home/todo.md"]).process_message("read todo.md", None);
        assert!(!r.requires_clarification);
        assert_eq!(r.base.param_str("note_path"), Some("todo.md"));
    }

    #[test]
    fn write_with_inferred_path_needs_confirmation() {
        let p = processor(&[]);
        let r = p.process_message("save as a note saying remember the milk", None);
        assert_eq!(r.intent(), Intent::WriteNote);
        assert!(r.base.needs_confirmation);
    }

    #[test]
    fn learning_updates_profile() {
        let store = Arc::new(InMemoryProfileStore::new());
        let mut p = EnhancedLanguageProcessor::new(&NlpConfig::default(), None, store.clone());
        p.set_vault_files(vec!["ideas.md".into()]);
        let r = p.process_message("read ideas.md", Some("alice"));
        assert_eq!(r.user_learning_data["intent_pattern"], "read_note:short");

        let profile = store.get("alice").unwrap();
        assert_eq!(profile.recent_files, vec!["ideas.md"]);
        assert_eq!(profile.intent_patterns["read_note:short"], 1);
    }

    #[test]
    fn alternatives_are_sorted_and_capped() {
        let p = processor(&[]);
        let r = p.process_message("brief overview please", None);
        assert!(r.alternative_interpretations.len() <= 3);
        assert!(r
            .alternative_interpretations
            .windows(2)
            .all(|w| w[0].1 >= w[1].1));
        assert!(r.alternative_interpretations.iter().all(|(i, _)| *i != r.intent()));
    }

    #[test]
    fn blended_confidence_weights_inferred() {
        assert_eq!(blended_confidence(0.9, 1, 0), 0.9);
        assert!((blended_confidence(0.9, 1, 1) - 0.75).abs() < 1e-9);
        assert_eq!(blended_confidence(0.0, 0, 2), 0.6);
    }
}

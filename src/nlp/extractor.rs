//! Parameter extraction: turns an [`IntentResult`] into the concrete
//! arguments a vault tool needs.

use regex::Regex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::LazyLock;

use super::inference::ensure_md;
use super::types::{Intent, IntentResult, ParameterResult, Params};

const ENTITY_CONFIDENCE: f64 = 0.9;

static MD_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\w\-/]+\.md)\b").expect("valid regex"));
static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([^"']+)["']"#).expect("valid regex"));
static NAMED_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:note|file)\s+(?:called|named|titled)\s+(\S+)").expect("valid regex")
});
static CONTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*(?:saying|that says|with (?:the )?(?:content|text)|content:|text:)\s*[:\-]?\s*(.+)$")
        .expect("valid regex")
});
static APPEND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:append|add|prepend)\s+(.+?)\s+to\s+").expect("valid regex")
});
static QUERY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:for|about)\s+(.+)").expect("valid regex"));
static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:top|first|limit|max(?:imum)?)\s+(\d+)").expect("valid regex")
});
static FOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:in|under|inside)\s+(?:the\s+|my\s+)?([\w\-/]+)\s+folder").expect("valid regex")
});

/// Tool that serves an intent, if any.
pub fn tool_for_intent(intent: Intent) -> Option<&'static str> {
    match intent {
        Intent::ReadNote => Some("read_note"),
        Intent::WriteNote => Some("write_note"),
        Intent::UpdateNote => Some("update_note"),
        Intent::SearchNotes => Some("search_notes"),
        Intent::VectorSearch => Some("vector_search"),
        Intent::ListNotes | Intent::VaultInfo | Intent::VaultStats => Some("list_notes"),
        Intent::Summarize | Intent::Enhance | Intent::ExtractInsights | Intent::GenerateQuestions => {
            Some("ai_process")
        }
        Intent::DeleteNote | Intent::Help | Intent::Greeting | Intent::Unknown => None,
    }
}

pub fn required_parameters(tool: &str) -> &'static [&'static str] {
    match tool {
        "read_note" => &["note_path"],
        "write_note" | "update_note" => &["note_path", "content"],
        "search_notes" | "vector_search" => &["query"],
        "ai_process" => &["note_path", "task"],
        _ => &[],
    }
}

pub fn optional_parameters(tool: &str) -> &'static [&'static str] {
    match tool {
        "write_note" => &["overwrite"],
        "update_note" => &["mode", "backup"],
        "search_notes" => &["limit"],
        "vector_search" => &["k"],
        "list_notes" => &["pattern"],
        "ai_process" => &["content", "model"],
        _ => &[],
    }
}

/// Extracts and normalizes tool parameters from a classified message.
pub struct ParameterExtractor {
    vault_root: Option<PathBuf>,
}

impl ParameterExtractor {
    pub fn new(vault_root: Option<PathBuf>) -> Self {
        Self { vault_root }
    }

    pub fn extract_parameters(&self, result: &IntentResult) -> ParameterResult {
        let Some(tool) = tool_for_intent(result.intent) else {
            return ParameterResult {
                tool_name: None,
                parameters: Params::new(),
                confidence: 1.0,
                missing_required: Vec::new(),
            };
        };

        let mut parameters = Params::new();
        let mut confidences = Vec::new();

        let wanted = required_parameters(tool)
            .iter()
            .chain(optional_parameters(tool).iter());
        for name in wanted {
            if let Some((value, confidence)) = self.extract_one(name, tool, result) {
                parameters.insert(name.to_string(), value);
                confidences.push(confidence);
            }
        }

        let missing_required: Vec<String> = required_parameters(tool)
            .iter()
            .filter(|name| !parameters.contains_key(**name))
            .map(|name| name.to_string())
            .collect();

        let confidence = if confidences.is_empty() {
            if missing_required.is_empty() {
                1.0
            } else {
                0.0
            }
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        tracing::debug!(
            tool,
            params = parameters.len(),
            missing = missing_required.len(),
            confidence,
            "parameters extracted"
        );

        ParameterResult {
            tool_name: Some(tool.to_string()),
            parameters,
            confidence,
            missing_required,
        }
    }

    fn extract_one(&self, name: &str, tool: &str, result: &IntentResult) -> Option<(Value, f64)> {
        let text = result.raw_text.as_str();
        match name {
            "note_path" => self.extract_note_path(tool, result),
            "content" => extract_content(tool, result),
            "query" => {
                if let Some(q) = result.entity_str("query") {
                    let q = strip_count_clause(q);
                    return Some((Value::String(q), ENTITY_CONFIDENCE));
                }
                capture(&QUERY_RE, text)
                    .map(|q| (Value::String(q), 0.7))
                    .or_else(|| capture(&QUOTED_RE, text).map(|q| (Value::String(q), 0.7)))
            }
            "limit" | "k" => capture(&COUNT_RE, text)
                .and_then(|n| n.parse::<u64>().ok())
                .map(|n| (Value::from(n), 0.8)),
            "task" => super::inference::infer_task(result.intent)
                .map(|task| (Value::String(task.to_string()), ENTITY_CONFIDENCE)),
            "mode" => {
                let lower = text.to_lowercase();
                let mode = if lower.contains("prepend") {
                    Some("prepend")
                } else if lower.contains("replace") || lower.contains("overwrite") {
                    Some("replace")
                } else if lower.contains("append") || lower.contains("add ") {
                    Some("append")
                } else {
                    None
                };
                mode.map(|m| (Value::String(m.to_string()), 0.8))
            }
            "pattern" => capture(&FOLDER_RE, text)
                .map(|folder| (Value::String(format!("{folder}/**/*.md")), 0.7)),
            _ => None,
        }
    }

    fn extract_note_path(&self, tool: &str, result: &IntentResult) -> Option<(Value, f64)> {
        let text = result.raw_text.as_str();
        let found = if let Some(entity) = result.entity_str("note_path") {
            let entity = if tool == "write_note" {
                strip_content_clause(entity)
            } else {
                entity.to_string()
            };
            Some((entity, ENTITY_CONFIDENCE))
        } else {
            capture(&MD_PATH_RE, text)
                .map(|p| (p, 0.8))
                .or_else(|| capture(&QUOTED_RE, text).map(|p| (p, 0.7)))
                .or_else(|| capture(&NAMED_FILE_RE, text).map(|p| (p, 0.6)))
        };

        found
            .filter(|(path, _)| !path.trim().is_empty())
            .map(|(path, confidence)| (Value::String(self.normalize_path(&path)), confidence))
    }

    /// Strip quotes, append `.md`, and prefer a spelling that exists in the
    /// vault (spaces to hyphens) when the literal one does not.
    pub fn normalize_path(&self, raw: &str) -> String {
        let cleaned = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
        let path = ensure_md(cleaned);

        let Some(root) = &self.vault_root else {
            return path;
        };
        if root.join(&path).exists() {
            return path;
        }
        let hyphenated = path.replace(' ', "-");
        if root.join(&hyphenated).exists() {
            return hyphenated;
        }
        let lowered = hyphenated.to_lowercase();
        if root.join(&lowered).exists() {
            return lowered;
        }
        path
    }
}

fn extract_content(tool: &str, result: &IntentResult) -> Option<(Value, f64)> {
    if let Some(content) = result.entity_str("content") {
        return Some((Value::String(content.to_string()), ENTITY_CONFIDENCE));
    }
    let text = result.raw_text.as_str();
    if let Some(content) = capture(&CONTENT_RE, text) {
        return Some((Value::String(content), 0.8));
    }
    if tool == "update_note" {
        if let Some(content) = capture(&APPEND_RE, text) {
            return Some((Value::String(content), 0.8));
        }
    }
    // A quoted span only counts as content when it is not the note name.
    let quoted = capture(&QUOTED_RE, text)?;
    let path_entity = result.entity_str("note_path").unwrap_or_default();
    if quoted.to_lowercase().contains(path_entity) && !path_entity.is_empty() {
        return None;
    }
    Some((Value::String(quoted), 0.7))
}

fn strip_content_clause(entity: &str) -> String {
    match CONTENT_RE.find(entity) {
        Some(m) => entity[..m.start()].trim().to_string(),
        None => entity.to_string(),
    }
}

fn strip_count_clause(query: &str) -> String {
    match COUNT_RE.find(query) {
        Some(m) if m.start() > 0 => query[..m.start()].trim().to_string(),
        _ => query.to_string(),
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::classifier::IntentClassifier;

    fn extract(text: &str) -> ParameterResult {
        let intent = IntentClassifier::new().classify(text);
        ParameterExtractor::new(None).extract_parameters(&intent)
    }

    #[test]
    fn read_note_gets_md_suffix() {
        let r = extract("open my note project plan");
        assert_eq!(r.tool_name.as_deref(), Some("read_note"));
        assert_eq!(r.parameters["note_path"], "project plan.md");
        assert!(r.is_complete());
        assert_eq!(r.confidence, 0.9);
    }

    #[test]
    fn write_note_splits_title_and_content() {
        let r = extract("create a note called groceries saying buy milk and eggs");
        assert_eq!(r.parameters["note_path"], "groceries.md");
        assert_eq!(r.parameters["content"], "buy milk and eggs");
        assert!(r.is_complete());
    }

    #[test]
    fn write_note_without_content_reports_missing() {
        let r = extract("create a note called groceries");
        assert_eq!(r.missing_required, vec!["content".to_string()]);
    }

    #[test]
    fn update_note_reads_append_clause() {
        let r = extract("append call the bank to todo.md");
        assert_eq!(r.tool_name.as_deref(), Some("update_note"));
        assert_eq!(r.parameters["note_path"], "todo.md");
        assert_eq!(r.parameters["content"], "call the bank");
        assert_eq!(r.parameters["mode"], "append");
    }

    #[test]
    fn search_with_limit() {
        let r = extract("search for tokio runtime top 3");
        assert_eq!(r.tool_name.as_deref(), Some("search_notes"));
        assert_eq!(r.parameters["query"], "tokio runtime");
        assert_eq!(r.parameters["limit"], 3);
    }

    #[test]
    fn ai_intents_carry_task() {
        let r = extract("summarize meeting-notes.md");
        assert_eq!(r.tool_name.as_deref(), Some("ai_process"));
        assert_eq!(r.parameters["task"], "summarize");
        assert_eq!(r.parameters["note_path"], "meeting-notes.md");
    }

    #[test]
    fn toolless_intents_are_complete() {
        let r = extract("hello");
        assert!(r.tool_name.is_none());
        assert!(r.is_complete());
        assert_eq!(r.confidence, 1.0);
    }

    #[test]
    fn confidence_averages_what_was_found() {
        let r = extract("summarize");
        assert_eq!(r.missing_required, vec!["note_path".to_string()]);
        // task alone was extracted
        assert_eq!(r.confidence, 0.9);
    }

    #[test]
    fn normalize_prefers_existing_hyphenated_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("daily-notes.md"), "x").unwrap();
        let extractor = ParameterExtractor::new(Some(dir.path().to_path_buf()));
        assert_eq!(extractor.normalize_path("daily notes"), "daily-notes.md");
        assert_eq!(extractor.normalize_path("'other'"), "other.md");
    }
}

//! Rule-chain intent classification.
//!
//! An ordered list of `(Intent, Regex)` rules is tried first; the first rule
//! that matches wins with a fixed confidence of [`PATTERN_CONFIDENCE`]. When no
//! rule matches, keyword-overlap scoring picks the best intent instead.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::types::{Intent, IntentResult, Params};

/// Confidence assigned to any regex-rule hit.
pub const PATTERN_CONFIDENCE: f64 = 0.9;

// Rule order matters: earlier rules shadow later ones.
const RULES: &[(Intent, &str)] = &[
    (Intent::ListNotes, r"^(?:please\s+)?(?:list|show)(?:\s+me)?(?:\s+all)?(?:\s+(?:of\s+)?(?:my|the))?\s+(?:notes|files)(?:\s+in\s+(?:my|the)\s+vault)?\s*[.!?]?$"),
    (Intent::ListNotes, r"^what\s+notes\s+do\s+i\s+have"),
    (Intent::ListNotes, r"^(?:list|ls)\s*$"),
    (Intent::VectorSearch, r"\b(?:semantic(?:ally)?|vector)\s+search\s+(?:for\s+|about\s+)?(.+)"),
    (Intent::VectorSearch, r"\b(?:find|show|get)\s+(?:me\s+)?(?:notes\s+)?(?:similar|related)\s+to\s+(.+)"),
    (Intent::VectorSearch, r"\bnotes\s+(?:similar|related)\s+to\s+(.+)"),
    (Intent::ReadNote, r"\b(?:read|open|view|display)\s+(?:me\s+)?(?:my\s+|the\s+)?(?:note\s+|file\s+)?(.+)"),
    (Intent::ReadNote, r"^show\s+(?:me\s+)?(?:my\s+|the\s+)?(?:note\s+|file\s+)?(.+)"),
    (Intent::WriteNote, r"\b(?:create|write|make|start)\s+(?:a\s+)?(?:new\s+)?note\b\s*(?:called|named|titled|about)?\s*(.*)"),
    (Intent::WriteNote, r"^new\s+note\b\s*(?:called|named|titled)?\s*(.*)"),
    (Intent::WriteNote, r"\bsave\s+(?:this\s+)?(?:as\s+)?(?:a\s+)?note\b\s*(.*)"),
    (Intent::UpdateNote, r"\b(?:update|edit|modify)\s+(?:my\s+|the\s+)?(?:note\s+)?(.+)"),
    (Intent::UpdateNote, r"\b(?:append|add)\s+.+?\s+to\s+(?:my\s+|the\s+)?(?:note\s+)?(.+)"),
    (Intent::DeleteNote, r"\b(?:delete|remove|trash|erase)\s+(?:my\s+|the\s+)?(?:note\s+)?(.+)"),
    (Intent::SearchNotes, r"\b(?:search|look)\s+(?:through\s+)?(?:my\s+)?(?:notes\s+|vault\s+)?(?:for|about|up)\s+(.+)"),
    (Intent::SearchNotes, r"\bfind\s+(?:my\s+)?(?:notes?\s+)?(?:about|on|for|containing|with|mentioning)\s+(.+)"),
    (Intent::SearchNotes, r"\bwhere\s+did\s+i\s+(?:write|mention)\s+(?:about\s+)?(.+)"),
    (Intent::SearchNotes, r"\bsearch\s+(.+)"),
    (Intent::Summarize, r"\b(?:summarize|summarise|sum\s+up|tl;?dr)(?:\s+(?:my\s+|the\s+)?(?:note\s+)?(.+))?"),
    (Intent::Summarize, r"\bsummary\s+of\s+(?:my\s+|the\s+)?(?:note\s+)?(.+)"),
    (Intent::Enhance, r"\b(?:enhance|improve|expand|polish|rewrite)(?:\s+(?:my\s+|the\s+)?(?:note\s+)?(.+))?"),
    (Intent::ExtractInsights, r"\b(?:extract|get|pull|find)\s+(?:the\s+)?(?:key\s+)?(?:insights|takeaways|learnings)(?:\s+(?:from|in)\s+(?:my\s+|the\s+)?(?:note\s+)?(.+))?"),
    (Intent::ExtractInsights, r"\binsights?\s+(?:from|in|of)\s+(?:my\s+|the\s+)?(?:note\s+)?(.+)"),
    (Intent::GenerateQuestions, r"\b(?:generate|create|make|write|give\s+me)\s+(?:some\s+)?(?:study\s+)?questions(?:\s+(?:about|from|for|on)\s+(?:my\s+|the\s+)?(?:note\s+)?(.+))?"),
    (Intent::GenerateQuestions, r"\bquiz\s+me(?:\s+(?:on|about)\s+(?:my\s+|the\s+)?(?:note\s+)?(.+))?"),
    (Intent::VaultStats, r"\b(?:vault|note)\s+(?:stats|statistics)\b"),
    (Intent::VaultStats, r"\bhow\s+many\s+(?:notes|files)\b"),
    (Intent::VaultInfo, r"\b(?:vault\s+(?:info|information|overview|structure)|about\s+(?:my|the)\s+vault)\b"),
    (Intent::Help, r"^(?:help|\?|what\s+can\s+you\s+do|how\s+do\s+i\s+use\s+(?:this|you)|commands)\b"),
    (Intent::Greeting, r"^(?:hi|hello|hey|howdy|good\s+(?:morning|afternoon|evening)|thanks|thank\s+you)\b"),
];

const KEYWORDS: &[(Intent, &[&str])] = &[
    (Intent::ReadNote, &["read", "open", "show", "view", "display", "see"]),
    (Intent::WriteNote, &["create", "write", "new", "make", "note", "save"]),
    (Intent::UpdateNote, &["update", "append", "edit", "modify", "change", "add to"]),
    (Intent::DeleteNote, &["delete", "remove", "trash", "erase"]),
    (Intent::SearchNotes, &["search", "find", "look", "where", "locate", "containing"]),
    (Intent::VectorSearch, &["similar", "related", "semantic", "like", "concept"]),
    (Intent::ListNotes, &["list", "all", "notes", "files", "show"]),
    (Intent::Summarize, &["summarize", "summary", "tldr", "brief", "overview"]),
    (Intent::Enhance, &["enhance", "improve", "expand", "polish", "better"]),
    (Intent::ExtractInsights, &["insights", "extract", "key points", "takeaways", "learnings"]),
    (Intent::GenerateQuestions, &["questions", "quiz", "ask", "generate"]),
    (Intent::VaultInfo, &["vault", "info", "about", "structure"]),
    (Intent::VaultStats, &["stats", "statistics", "count", "how many"]),
    (Intent::Help, &["help", "how", "commands", "usage"]),
    (Intent::Greeting, &["hi", "hello", "hey", "thanks"]),
];

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([^"']+)["']"#).expect("valid regex"));
static MD_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\w\-/]+\.md)\b").expect("valid regex"));
static PREPOSITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:about|for|on|called|named|titled)\s+(.+)").expect("valid regex")
});
static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9']+").expect("valid regex"));

struct PatternRule {
    intent: Intent,
    pattern: Regex,
}

/// Maps raw text to an [`IntentResult`]. Deterministic and stateless after
/// construction.
pub struct IntentClassifier {
    rules: Vec<PatternRule>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    pub fn new() -> Self {
        let rules = RULES
            .iter()
            .filter_map(|(intent, source)| match Regex::new(source) {
                Ok(pattern) => Some(PatternRule {
                    intent: *intent,
                    pattern,
                }),
                Err(e) => {
                    tracing::error!(intent = %intent, error = %e, "skipping invalid intent rule");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// Classify one message. Never fails: empty input yields `Unknown` at 0.0.
    pub fn classify(&self, text: &str) -> IntentResult {
        let normalized = text.trim().to_lowercase();
        if normalized.is_empty() {
            return IntentResult::unknown(text);
        }

        if let Some(result) = self.match_rules(&normalized, text) {
            tracing::debug!(intent = %result.intent, "intent matched by rule");
            return result;
        }

        let result = self.score_keywords(&normalized, text);
        tracing::debug!(
            intent = %result.intent,
            confidence = result.confidence,
            "intent scored by keywords"
        );
        result
    }

    fn match_rules(&self, normalized: &str, raw: &str) -> Option<IntentResult> {
        for rule in &self.rules {
            let Some(caps) = rule.pattern.captures(normalized) else {
                continue;
            };

            let mut entities = Params::new();
            let captured = (1..caps.len())
                .rev()
                .filter_map(|i| caps.get(i))
                .map(|m| clean_entity(m.as_str()))
                .find(|s| !s.is_empty());

            if let (Some(value), Some(key)) = (captured, rule.intent.entity_key()) {
                entities.insert(key.to_string(), Value::String(value));
            }

            return Some(IntentResult {
                intent: rule.intent,
                confidence: PATTERN_CONFIDENCE,
                entities,
                raw_text: raw.to_string(),
            });
        }
        None
    }

    fn score_keywords(&self, normalized: &str, raw: &str) -> IntentResult {
        let words: Vec<&str> = WORD_RE
            .find_iter(normalized)
            .map(|m| m.as_str())
            .collect();

        let mut best: Option<(Intent, f64)> = None;
        for (intent, keywords) in KEYWORDS {
            let hits = keywords
                .iter()
                .filter(|kw| {
                    if kw.contains(' ') {
                        normalized.contains(*kw)
                    } else {
                        words.contains(kw)
                    }
                })
                .count();
            let score = hits as f64 / keywords.len() as f64;
            if score > best.map(|(_, s)| s).unwrap_or(0.0) {
                best = Some((*intent, score));
            }
        }

        match best {
            Some((intent, confidence)) => IntentResult {
                intent,
                confidence,
                entities: heuristic_entities(intent, normalized),
                raw_text: raw.to_string(),
            },
            None => IntentResult::unknown(raw),
        }
    }
}

/// Fallback entity extraction: quoted strings, `.md` filenames, then the text
/// after a preposition.
fn heuristic_entities(intent: Intent, normalized: &str) -> Params {
    let mut entities = Params::new();
    let Some(key) = intent.entity_key() else {
        return entities;
    };

    let value = if key == "note_path" {
        MD_FILE_RE
            .captures(normalized)
            .or_else(|| QUOTED_RE.captures(normalized))
            .or_else(|| PREPOSITION_RE.captures(normalized))
    } else {
        QUOTED_RE
            .captures(normalized)
            .or_else(|| PREPOSITION_RE.captures(normalized))
    }
    .and_then(|c| c.get(1))
    .map(|m| clean_entity(m.as_str()))
    .filter(|s| !s.is_empty());

    if let Some(value) = value {
        entities.insert(key.to_string(), Value::String(value));
    }
    entities
}

/// Trim whitespace, quotes, trailing punctuation and a trailing "please".
pub(crate) fn clean_entity(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(stripped) = s.strip_suffix("please") {
        s = stripped.trim_end();
    }
    s.trim_end_matches(['.', '?', '!', ','])
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> IntentResult {
        IntentClassifier::new().classify(text)
    }

    #[test]
    fn every_rule_compiles() {
        assert_eq!(IntentClassifier::new().rules.len(), RULES.len());
    }

    #[test]
    fn read_note_extracts_path() {
        let r = classify("Read my daily notes");
        assert_eq!(r.intent, Intent::ReadNote);
        assert_eq!(r.confidence, PATTERN_CONFIDENCE);
        assert_eq!(r.entity_str("note_path"), Some("daily notes"));
    }

    #[test]
    fn search_extracts_query() {
        let r = classify("search my notes for rust ownership?");
        assert_eq!(r.intent, Intent::SearchNotes);
        assert_eq!(r.entity_str("query"), Some("rust ownership"));
    }

    #[test]
    fn similar_goes_to_vector_search() {
        let r = classify("show me notes similar to distributed systems");
        assert_eq!(r.intent, Intent::VectorSearch);
        assert_eq!(r.entity_str("query"), Some("distributed systems"));
    }

    #[test]
    fn list_beats_read_for_bare_show() {
        assert_eq!(classify("show my notes").intent, Intent::ListNotes);
        assert_eq!(classify("list").intent, Intent::ListNotes);
    }

    #[test]
    fn write_note_without_title_has_no_entity() {
        let r = classify("create a new note");
        assert_eq!(r.intent, Intent::WriteNote);
        assert!(r.entities.is_empty());
    }

    #[test]
    fn summarize_alone_matches() {
        let r = classify("summarize");
        assert_eq!(r.intent, Intent::Summarize);
        assert!(r.entities.is_empty());
    }

    #[test]
    fn greeting_and_help() {
        assert_eq!(classify("hello there").intent, Intent::Greeting);
        assert_eq!(classify("what can you do?").intent, Intent::Help);
        assert_eq!(classify("how many notes are there").intent, Intent::VaultStats);
    }

    #[test]
    fn keyword_fallback_scores_fraction() {
        let r = classify("brief overview please");
        assert_eq!(r.intent, Intent::Summarize);
        assert!((r.confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn fallback_extracts_md_filename() {
        let r = classify("make it better: ideas.md");
        assert_eq!(r.intent, Intent::Enhance);
        assert_eq!(r.entity_str("note_path"), Some("ideas.md"));
    }

    #[test]
    fn empty_and_nonsense_are_unknown() {
        for text in ["", "   ", "\n\t", "qwerty zxcv"] {
            let r = classify(text);
            assert_eq!(r.intent, Intent::Unknown);
            assert_eq!(r.confidence, 0.0);
        }
    }

    #[test]
    fn clean_entity_strips_noise() {
        assert_eq!(clean_entity(" 'ideas.md' please "), "ideas.md");
        assert_eq!(clean_entity("rust?!"), "rust");
    }
}

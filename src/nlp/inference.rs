//! Heuristics for filling in parameters the user did not state outright.
//!
//! Shared by the enhanced processor and the tool selector so both infer the
//! same values from the same message.

use regex::Regex;
use std::sync::LazyLock;

use super::types::Intent;

static MD_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\w\-/]+\.md)\b").expect("valid regex"));
static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["“']([^"”']+)["”']"#).expect("valid regex"));
static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9][a-z0-9_\-]*").expect("valid regex"));
static CONTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:saying|that says|with (?:the )?(?:content|text)|content:|text:|containing)\s*[:\-]?\s*(.+)$")
        .expect("valid regex")
});
static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:called|named|titled|title is|title:)\s+["']?([^"',.;]+)"#).expect("valid regex")
});

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "my", "me", "i", "to", "of", "in", "on", "for", "about", "and", "or", "is",
    "it", "this", "that", "please", "can", "you", "what", "with", "from", "note", "notes", "file",
    "files", "save", "saying", "called", "named", "did", "have", "has", "was", "read", "open", "show", "view", "display", "create", "write", "make", "new", "update",
    "edit", "delete", "remove", "search", "find", "look", "summarize", "summarise", "enhance",
    "improve", "extract", "insights", "generate", "questions", "some", "all", "up", "do", "get",
];

const LEADING_FILLER: &[&str] = &[
    "search", "find", "look", "lookup", "up", "for", "about", "on", "my", "the", "notes", "note",
    "me", "semantic", "semantically", "vector", "similar", "related", "to", "containing", "with",
    "mentioning", "through", "vault", "in", "please", "show", "get", "any",
];

/// Lowercase non-stopword keywords of at least three characters, in order.
pub fn keywords(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    WORD_RE
        .find_iter(&lower)
        .map(|m| m.as_str().trim_end_matches(".md").to_string())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Append `.md` unless the name already ends with it.
pub fn ensure_md(name: &str) -> String {
    let name = name.trim();
    if name.to_lowercase().ends_with(".md") {
        name.to_string()
    } else {
        format!("{name}.md")
    }
}

/// Infer a note path from the message. Tries, in order: an explicit `.md`
/// token, a quoted string, keyword hits against real vault filenames, a name
/// built from the first two keywords, and finally the most recently used file.
pub fn infer_file_path(
    text: &str,
    vault_files: &[String],
    recent_file: Option<&str>,
) -> Option<String> {
    let lower = text.to_lowercase();

    if let Some(m) = MD_TOKEN_RE.captures(&lower).and_then(|c| c.get(1)) {
        return Some(m.as_str().to_string());
    }

    if let Some(m) = QUOTED_RE.captures(text).and_then(|c| c.get(1)) {
        let quoted = m.as_str().trim();
        if !quoted.is_empty() {
            return Some(ensure_md(quoted));
        }
    }

    let words = keywords(text);
    if !words.is_empty() {
        let best = vault_files
            .iter()
            .map(|path| {
                let name = path.to_lowercase();
                let hits = words.iter().filter(|w| name.contains(w.as_str())).count();
                (hits, path)
            })
            .filter(|(hits, _)| *hits > 0)
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.len().cmp(&a.1.len())));
        if let Some((_, path)) = best {
            return Some(path.clone());
        }

        let stem = words.iter().take(2).cloned().collect::<Vec<_>>().join("-");
        return Some(format!("{stem}.md"));
    }

    recent_file.map(str::to_string)
}

/// Strip leading verbs, prepositions and filler from a search request.
pub fn infer_query(text: &str) -> Option<String> {
    let lower = text.trim().to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let start = words
        .iter()
        .position(|w| !LEADING_FILLER.contains(&w.trim_matches(|c: char| !c.is_alphanumeric())))
        .unwrap_or(words.len());
    let query = words[start..]
        .join(" ")
        .trim_end_matches(['?', '.', '!'])
        .trim()
        .to_string();
    (query.len() >= 2).then_some(query)
}

/// The fixed AI task string for AI-processing intents.
pub fn infer_task(intent: Intent) -> Option<&'static str> {
    match intent {
        Intent::Summarize => Some("summarize"),
        Intent::Enhance => Some("enhance"),
        Intent::ExtractInsights => Some("extract_insights"),
        Intent::GenerateQuestions => Some("generate_questions"),
        _ => None,
    }
}

/// Text introduced by "saying ...", "with content ...", or a quoted span.
pub fn infer_content(text: &str) -> Option<String> {
    if let Some(m) = CONTENT_RE.captures(text).and_then(|c| c.get(1)) {
        let content = m
            .as_str()
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .to_string();
        if !content.is_empty() {
            return Some(content);
        }
    }
    QUOTED_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Title from "called X" / "named X" / "titled X".
pub fn infer_title(text: &str) -> Option<String> {
    TITLE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

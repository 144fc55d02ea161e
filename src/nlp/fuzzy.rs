//! Fuzzy filename matching.
//!
//! [`similarity`] is the Ratcliff/Obershelp "gestalt" ratio: twice the number
//! of matching characters (found by recursively taking the longest common
//! substring) divided by the total length of both strings.

use super::types::FileMatch;

/// Similarity ratio in `[0.0, 1.0]`. Two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (a_start, b_start, len) = longest_common_substring(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..a_start], &b[..b_start])
        + matching_chars(&a[a_start + len..], &b[b_start + len..])
}

/// Returns `(start_in_a, start_in_b, length)` of the leftmost longest match.
fn longest_common_substring(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    // lengths[j + 1] = length of the common suffix ending at a[i], b[j]
    let mut lengths = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        let mut prev_diag = 0;
        for (j, cb) in b.iter().enumerate() {
            let above = lengths[j + 1];
            lengths[j + 1] = if ca == cb { prev_diag + 1 } else { 0 };
            if lengths[j + 1] > best.2 {
                best = (i + 1 - lengths[j + 1], j + 1 - lengths[j + 1], lengths[j + 1]);
            }
            prev_diag = above;
        }
    }
    best
}

/// Final path component, lowercased, used as the comparison key.
fn match_key(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_lowercase()
}

/// Rank `candidates` by similarity to `target`, keeping those at or above
/// `threshold`, best first, at most `limit`.
pub fn rank_file_matches(
    target: &str,
    candidates: &[String],
    threshold: f64,
    limit: usize,
) -> Vec<FileMatch> {
    let key = match_key(target);
    if key.is_empty() {
        return Vec::new();
    }

    let mut matches: Vec<FileMatch> = candidates
        .iter()
        .map(|path| FileMatch {
            path: path.clone(),
            similarity: similarity(&key, &match_key(path)),
        })
        .filter(|m| m.similarity >= threshold)
        .collect();

    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    matches.truncate(limit);
    matches
}

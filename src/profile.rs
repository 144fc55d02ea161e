//! Per-user learned preferences.
//!
//! Everything the pipeline learns about a user (which intents they use, which
//! notes they open, which tools worked, how verbose they are) lives in a
//! [`UserProfile`] behind the [`UserProfileStore`] trait. The processor, tool
//! selector and response generator all share one store.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use crate::nlp::types::Intent;

pub const MAX_RECENT_FILES: usize = 10;
pub const MAX_HISTORY: usize = 50;

/// How much detail a user seems to want in replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStyle {
    Concise,
    #[default]
    Balanced,
    Detailed,
}

impl ResponseStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concise => "concise",
            Self::Balanced => "balanced",
            Self::Detailed => "detailed",
        }
    }
}

/// Message length bucket used in intent pattern keys.
pub fn length_bucket(chars: usize) -> &'static str {
    match chars {
        0..=20 => "short",
        21..=80 => "medium",
        _ => "long",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub intent: Intent,
    pub response_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    /// `"{intent}:{length bucket}"` → count.
    pub intent_patterns: BTreeMap<String, u64>,
    pub file_usage: BTreeMap<String, u64>,
    /// Most recent first, deduplicated.
    pub recent_files: Vec<String>,
    pub tool_usage: BTreeMap<String, u64>,
    pub preferred_style: ResponseStyle,
    pub style_hints: BTreeMap<String, u64>,
    pub history: VecDeque<HistoryEntry>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn record_intent(&mut self, intent: Intent, message_chars: usize) {
        let key = format!("{}:{}", intent.as_str(), length_bucket(message_chars));
        *self.intent_patterns.entry(key).or_default() += 1;
        self.record_style_hint(length_bucket(message_chars));
        self.last_seen = Some(Utc::now());
    }

    pub fn record_file_access(&mut self, path: &str) {
        *self.file_usage.entry(path.to_string()).or_default() += 1;
        self.recent_files.retain(|p| p != path);
        self.recent_files.insert(0, path.to_string());
        self.recent_files.truncate(MAX_RECENT_FILES);
    }

    pub fn record_tool_use(&mut self, tool: &str) {
        *self.tool_usage.entry(tool.to_string()).or_default() += 1;
    }

    pub fn push_history(&mut self, intent: Intent, response_type: &str) {
        self.history.push_back(HistoryEntry {
            timestamp: Utc::now(),
            intent,
            response_type: response_type.to_string(),
        });
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }

    /// Short messages push toward concise replies, long ones toward detailed.
    fn record_style_hint(&mut self, bucket: &str) {
        *self.style_hints.entry(bucket.to_string()).or_default() += 1;
        let count = |k: &str| self.style_hints.get(k).copied().unwrap_or(0);
        let (short, medium, long) = (count("short"), count("medium"), count("long"));
        self.preferred_style = if short > medium + long {
            ResponseStyle::Concise
        } else if long > short + medium {
            ResponseStyle::Detailed
        } else {
            ResponseStyle::Balanced
        };
    }

    /// The user's most used tool, ties broken alphabetically.
    pub fn preferred_tool(&self) -> Option<&str> {
        self.tool_usage
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(tool, _)| tool.as_str())
    }

    /// The `n` most opened files, most used first.
    pub fn top_files(&self, n: usize) -> Vec<(&str, u64)> {
        let mut files: Vec<(&str, u64)> = self
            .file_usage
            .iter()
            .map(|(path, count)| (path.as_str(), *count))
            .collect();
        files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        files.truncate(n);
        files
    }

    pub fn most_common_intent(&self) -> Option<Intent> {
        let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
        for (key, count) in &self.intent_patterns {
            let intent = key.split(':').next().unwrap_or(key);
            *totals.entry(intent).or_default() += count;
        }
        totals
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .and_then(|(intent, _)| intent.parse().ok())
    }
}

/// Injected storage for learned user state.
pub trait UserProfileStore: Send + Sync {
    fn get(&self, user_id: &str) -> Option<UserProfile>;

    /// Apply `f` to the user's profile, creating an empty one first if needed.
    fn update(&self, user_id: &str, f: &mut dyn FnMut(&mut UserProfile));
}

// ── In-memory ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: Mutex<HashMap<String, UserProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserProfileStore for InMemoryProfileStore {
    fn get(&self, user_id: &str) -> Option<UserProfile> {
        let profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        profiles.get(user_id).cloned()
    }

    fn update(&self, user_id: &str, f: &mut dyn FnMut(&mut UserProfile)) {
        let mut profiles = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        f(profiles.entry(user_id.to_string()).or_default());
    }
}

// ── SQLite ──────────────────────────────────────────────────────────

/// Profiles stored as JSON in the `user_profiles` table.
pub struct SqliteProfileStore {
    conn: Mutex<Connection>,
}

impl SqliteProfileStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn load(conn: &Connection, user_id: &str) -> anyhow::Result<Option<UserProfile>> {
        let json: Option<String> = conn
            .query_row(
                "SELECT profile FROM user_profiles WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match json {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    fn save(conn: &Connection, user_id: &str, profile: &UserProfile) -> anyhow::Result<()> {
        let json = serde_json::to_string(profile)?;
        conn.execute(
            "INSERT INTO user_profiles (user_id, profile, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET profile = excluded.profile, updated_at = excluded.updated_at",
            params![user_id, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

impl UserProfileStore for SqliteProfileStore {
    fn get(&self, user_id: &str) -> Option<UserProfile> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        match Self::load(&conn, user_id) {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "failed to load user profile");
                None
            }
        }
    }

    fn update(&self, user_id: &str, f: &mut dyn FnMut(&mut UserProfile)) {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut profile = match Self::load(&conn, user_id) {
            Ok(profile) => profile.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "unreadable user profile, starting fresh");
                UserProfile::default()
            }
        };
        f(&mut profile);
        if let Err(e) = Self::save(&conn, user_id, &profile) {
            tracing::warn!(user_id, error = %e, "failed to save user profile");
        }
    }
}

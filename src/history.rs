//! Conversation log collaborator.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => anyhow::bail!("invalid message role: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedMessage {
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub trait ConversationLog: Send + Sync {
    fn append(&self, role: MessageRole, content: &str) -> Result<()>;

    /// The last `n` messages, oldest first.
    fn recent(&self, n: usize) -> Result<Vec<LoggedMessage>>;
}

// ── SQLite ──────────────────────────────────────────────────────────

/// Messages for one session in the `messages` table.
pub struct SqliteConversationLog {
    conn: Mutex<Connection>,
    session_id: String,
}

impl SqliteConversationLog {
    pub fn new(conn: Connection, session_id: impl Into<String>) -> Self {
        Self {
            conn: Mutex::new(conn),
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl ConversationLog for SqliteConversationLog {
    fn append(&self, role: MessageRole, content: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![self.session_id, role.as_str(), content, Utc::now().to_rfc3339()],
        )
        .context("failed to append message")?;
        Ok(())
    }

    fn recent(&self, n: usize) -> Result<Vec<LoggedMessage>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT role, content, created_at FROM messages
             WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![self.session_id, n as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut messages = rows
            .into_iter()
            .map(|(role, content, created_at)| {
                Ok(LoggedMessage {
                    role: role.parse()?,
                    content,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .with_context(|| format!("bad timestamp {created_at}"))?
                        .with_timezone(&Utc),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }
}

// ── In-memory ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryConversationLog {
    messages: Mutex<Vec<LoggedMessage>>,
}

impl InMemoryConversationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationLog for InMemoryConversationLog {
    fn append(&self, role: MessageRole, content: &str) -> Result<()> {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        messages.push(LoggedMessage {
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    fn recent(&self, n: usize) -> Result<Vec<LoggedMessage>> {
        let messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let start = messages.len().saturating_sub(n);
        Ok(messages[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    #[test]
    fn sqlite_log_keeps_sessions_apart() {
        let conn = open_memory_database().unwrap();
        let log = SqliteConversationLog::new(conn, "s1");
        log.append(MessageRole::User, "read ideas.md").unwrap();
        log.append(MessageRole::Assistant, "Here's ideas.md").unwrap();
        log.append(MessageRole::User, "thanks").unwrap();

        let recent = log.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].role, MessageRole::Assistant);
        assert_eq!(recent[1].content, "thanks");
    }

    #[test]
    fn in_memory_recent_is_oldest_first() {
        let log = InMemoryConversationLog::new();
        for i in 0..4 {
            log.append(MessageRole::User, &format!("m{i}")).unwrap();
        }
        let recent: Vec<String> = log.recent(3).unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(recent, vec!["m1", "m2", "m3"]);
        assert!(log.recent(0).unwrap().is_empty());
    }

    #[test]
    fn roles_parse() {
        assert_eq!("assistant".parse::<MessageRole>().unwrap(), MessageRole::Assistant);
        assert!("system".parse::<MessageRole>().is_err());
    }
}

//! Vault file access.
//!
//! The [`Vault`] trait is the only way the rest of the crate touches notes.
//! Paths are vault-relative and `/`-separated. [`FileVault`] is the
//! filesystem implementation.

mod fs;

pub use fs::FileVault;

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("note not found: {0}")]
    NotFound(String),
    #[error("note already exists: {0}")]
    AlreadyExists(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid vault path: {0}")]
    InvalidPath(String),
    #[error("vault I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Classify an I/O error for `path`.
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// How [`Vault::update`] combines new text with the existing note.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    #[default]
    Append,
    Prepend,
    Replace,
}

impl UpdateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Replace => "replace",
        }
    }

    /// Combine `existing` note text with `content`.
    pub fn apply(&self, existing: &str, content: &str) -> String {
        match self {
            Self::Append => {
                let sep = if existing.is_empty() || existing.ends_with('\n') { "" } else { "\n" };
                format!("{existing}{sep}{content}")
            }
            Self::Prepend => {
                let sep = if content.ends_with('\n') { "" } else { "\n" };
                format!("{content}{sep}{existing}")
            }
            Self::Replace => content.to_string(),
        }
    }
}

impl std::fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UpdateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "append" => Ok(Self::Append),
            "prepend" => Ok(Self::Prepend),
            "replace" => Ok(Self::Replace),
            _ => Err(format!("invalid update mode: {s} (expected append, prepend or replace)")),
        }
    }
}

#[async_trait]
pub trait Vault: Send + Sync {
    async fn read(&self, path: &str) -> Result<String, VaultError>;

    /// Write a note, creating parent folders. Fails with `AlreadyExists` when
    /// the note exists and `overwrite` is false.
    async fn write(&self, path: &str, content: &str, overwrite: bool) -> Result<(), VaultError>;

    /// Vault-relative paths matching a glob (`*`, `?`, `**`), sorted.
    async fn list(&self, pattern: &str) -> Result<Vec<String>, VaultError>;

    /// Change an existing note. Returns the backup path when one was written.
    async fn update(
        &self,
        path: &str,
        content: &str,
        mode: UpdateMode,
        backup: bool,
    ) -> Result<Option<String>, VaultError>;
}

/// `*` and `?` stay within one path segment; `**` spans segments.
const LIST_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A compiled listing pattern for vault-relative paths.
#[derive(Debug, Clone)]
pub struct NotePattern(Pattern);

impl NotePattern {
    pub fn new(pattern: &str) -> Result<Self, VaultError> {
        Pattern::new(pattern)
            .map(Self)
            .map_err(|e| VaultError::InvalidPath(format!("{pattern} ({e})")))
    }

    pub fn matches(&self, path: &str) -> bool {
        self.0.matches_with(path, LIST_OPTIONS)
    }
}

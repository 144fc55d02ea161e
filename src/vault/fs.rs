use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use super::{NotePattern, UpdateMode, Vault, VaultError};

/// A vault rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct FileVault {
    root: PathBuf,
}

impl FileVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a vault-relative path onto the root, refusing anything that could
    /// escape it.
    fn resolve(&self, path: &str) -> Result<PathBuf, VaultError> {
        let rel = Path::new(path);
        if path.trim().is_empty() || rel.is_absolute() {
            return Err(VaultError::InvalidPath(path.to_string()));
        }
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(VaultError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl Vault for FileVault {
    async fn read(&self, path: &str) -> Result<String, VaultError> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| VaultError::from_io(e, path))
    }

    async fn write(&self, path: &str, content: &str, overwrite: bool) -> Result<(), VaultError> {
        let full = self.resolve(path)?;
        if !overwrite && tokio::fs::try_exists(&full).await.unwrap_or(false) {
            return Err(VaultError::AlreadyExists(path.to_string()));
        }
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VaultError::from_io(e, path))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| VaultError::from_io(e, path))?;
        tracing::debug!(path, bytes = content.len(), "note written");
        Ok(())
    }

    async fn list(&self, pattern: &str) -> Result<Vec<String>, VaultError> {
        let matcher = NotePattern::new(pattern)?;
        let root = self.root.clone();

        let files = tokio::task::spawn_blocking(move || {
            let mut files: Vec<String> = walkdir::WalkDir::new(&root)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| {
                    let rel = entry.path().strip_prefix(&root).ok()?;
                    let rel = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    matcher.matches(&rel).then_some(rel)
                })
                .collect();
            files.sort();
            files
        })
        .await
        .map_err(|e| VaultError::Io(std::io::Error::other(e)))?;

        Ok(files)
    }

    async fn update(
        &self,
        path: &str,
        content: &str,
        mode: UpdateMode,
        backup: bool,
    ) -> Result<Option<String>, VaultError> {
        let existing = self.read(path).await?;

        let backup_path = if backup {
            let name = backup_name(path);
            self.write(&name, &existing, true).await?;
            Some(name)
        } else {
            None
        };

        self.write(path, &mode.apply(&existing, content), true).await?;
        tracing::info!(path, mode = %mode, backup = backup_path.as_deref().unwrap_or("-"), "note updated");
        Ok(backup_path)
    }
}

/// `<stem>.<timestamp>.bak` next to the original note.
fn backup_name(path: &str) -> String {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
    let (dir, file) = match path.rsplit_once('/') {
        Some((dir, file)) => (format!("{dir}/"), file),
        None => (String::new(), path),
    };
    let stem = file.strip_suffix(".md").unwrap_or(file);
    format!("{dir}{stem}.{stamp}.bak")
}

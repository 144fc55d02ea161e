#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use vaultmind::agent::EnhancedChatAgent;
use vaultmind::config::VaultMindConfig;
use vaultmind::llm::{GenerationRequest, LlmError, TextGenerator};
use vaultmind::profile::{InMemoryProfileStore, UserProfileStore};
use vaultmind::search::{SearchHit, VectorSearch};
use vaultmind::tools::ToolRegistry;
use vaultmind::vault::{FileVault, Vault};

pub const DAILY_NOTES: &str = "# Daily notes\n\nMonday: planned the sprint.\nTuesday: paired on the parser.\n";
pub const RUST_OWNERSHIP: &str =
    "# Rust ownership\n\nEvery value has a single owner.\nBorrowing lets code use a value without taking it.\n";
pub const RECIPES: &str = "# Recipes\n\nPancakes: flour, eggs, milk.\n";

/// A temporary vault seeded with three notes. Keep the `TempDir` alive for
/// the duration of the test.
pub fn test_vault() -> (TempDir, Arc<FileVault>) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    std::fs::create_dir_all(root.join("projects")).unwrap();
    std::fs::write(root.join("daily-notes.md"), DAILY_NOTES).unwrap();
    std::fs::write(root.join("projects/rust-ownership.md"), RUST_OWNERSHIP).unwrap();
    std::fs::write(root.join("recipes.md"), RECIPES).unwrap();
    let vault = Arc::new(FileVault::new(root));
    (tmp, vault)
}

/// Default config pointed at `root`, with no LLM and no on-disk history.
pub fn test_config(root: &std::path::Path) -> VaultMindConfig {
    let mut config = VaultMindConfig::default();
    config.vault.root = root.to_string_lossy().into_owned();
    config.llm.provider = "none".into();
    config.storage.history_enabled = false;
    config
}

/// Returns canned text and remembers every prompt it was given.
pub struct FakeGenerator {
    pub reply: String,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        Ok(self.reply.clone())
    }

    fn default_model(&self) -> &str {
        "fake-model"
    }
}

/// Behaves like a backend that is not running.
pub struct DownGenerator;

#[async_trait]
impl TextGenerator for DownGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, LlmError> {
        Err(LlmError::Unreachable {
            url: "http://127.0.0.1:9".into(),
            reason: "connection refused".into(),
        })
    }

    fn default_model(&self) -> &str {
        "down-model"
    }
}

/// Returns the same hits for every query, truncated to `k`.
pub struct FakeVectorSearch {
    pub hits: Vec<SearchHit>,
}

impl FakeVectorSearch {
    pub fn with_ids(ids: &[(&str, f64)]) -> Self {
        let hits = ids
            .iter()
            .map(|(id, score)| SearchHit {
                id: id.to_string(),
                score: *score,
                text: format!("text of {id}"),
                metadata: serde_json::Value::Null,
            })
            .collect();
        Self { hits }
    }
}

#[async_trait]
impl VectorSearch for FakeVectorSearch {
    async fn search(&self, _query: &str, k: usize) -> anyhow::Result<Vec<SearchHit>> {
        Ok(self.hits.iter().take(k).cloned().collect())
    }
}

/// An agent over `vault` with the default tools plus an optional generator.
pub fn test_agent(
    config: &VaultMindConfig,
    vault: Arc<FileVault>,
    generator: Option<Arc<dyn TextGenerator>>,
) -> (EnhancedChatAgent, Arc<InMemoryProfileStore>) {
    let vault: Arc<dyn Vault> = vault;
    let tools = ToolRegistry::with_defaults(vault.clone(), generator, None, config);
    let profiles = Arc::new(InMemoryProfileStore::new());
    let store: Arc<dyn UserProfileStore> = profiles.clone();
    (EnhancedChatAgent::new(config, vault, tools, store), profiles)
}

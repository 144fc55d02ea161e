pub mod ask;
pub mod chat;
pub mod flows;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::warn;

use vaultmind::agent::EnhancedChatAgent;
use vaultmind::config::VaultMindConfig;
use vaultmind::history::SqliteConversationLog;
use vaultmind::llm::{OllamaGenerator, TextGenerator};
use vaultmind::profile::{InMemoryProfileStore, SqliteProfileStore, UserProfileStore};
use vaultmind::tools::ToolRegistry;
use vaultmind::vault::{FileVault, Vault};

/// Wire the agent from config: filesystem vault, Ollama when configured,
/// SQLite-backed profiles and history when storage is enabled.
pub fn build_agent(config: &VaultMindConfig, user: Option<String>) -> Result<EnhancedChatAgent> {
    let root = config.resolved_vault_root();
    std::fs::create_dir_all(&root)
        .with_context(|| format!("failed to create vault directory {}", root.display()))?;
    let vault: Arc<dyn Vault> = Arc::new(FileVault::new(root));

    let generator: Option<Arc<dyn TextGenerator>> = match config.llm.provider.as_str() {
        "ollama" => match OllamaGenerator::new(&config.llm) {
            Ok(g) => Some(Arc::new(g)),
            Err(e) => {
                warn!(error = %e, "AI processing disabled");
                None
            }
        },
        "none" | "" => None,
        other => {
            warn!(provider = other, "unsupported LLM provider, AI processing disabled");
            None
        }
    };

    let tools = ToolRegistry::with_defaults(vault.clone(), generator, None, config);

    if !config.storage.history_enabled {
        let profiles: Arc<dyn UserProfileStore> = Arc::new(InMemoryProfileStore::new());
        let agent = EnhancedChatAgent::new(config, vault, tools, profiles);
        return Ok(match user {
            Some(user) => agent.with_user(user),
            None => agent,
        });
    }

    let db_path = config.resolved_db_path();
    let profiles: Arc<dyn UserProfileStore> =
        Arc::new(SqliteProfileStore::new(vaultmind::db::open_database(&db_path)?));
    let session_id = uuid::Uuid::now_v7().to_string();
    let log = Arc::new(SqliteConversationLog::new(
        vaultmind::db::open_database(&db_path)?,
        session_id,
    ));

    let agent = EnhancedChatAgent::new(config, vault, tools, profiles).with_log(log);
    Ok(match user {
        Some(user) => agent.with_user(user),
        None => agent,
    })
}

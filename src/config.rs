use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VaultMindConfig {
    pub logging: LoggingConfig,
    pub vault: VaultConfig,
    pub llm: LlmConfig,
    pub nlp: NlpConfig,
    pub selection: SelectionConfig,
    pub flows: FlowConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VaultConfig {
    pub root: String,
    pub backup_on_update: bool,
    pub default_pattern: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

/// Thresholds for the language-processing pipeline.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NlpConfig {
    pub fuzzy_threshold: f64,
    pub max_file_matches: usize,
    pub max_alternatives: usize,
    pub confident_threshold: f64,
    pub context_window: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SelectionConfig {
    pub execution_threshold: f64,
    pub recency_window_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FlowConfig {
    pub timeout_minutes: i64,
    pub max_flows_per_user: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub history_enabled: bool,
}

impl Default for VaultMindConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            vault: VaultConfig::default(),
            llm: LlmConfig::default(),
            nlp: NlpConfig::default(),
            selection: SelectionConfig::default(),
            flows: FlowConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: "~/vault".into(),
            backup_on_update: true,
            default_pattern: "**/*.md".into(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".into(),
            base_url: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            temperature: 0.7,
            max_tokens: 1024,
            timeout_secs: 120,
        }
    }
}

impl Default for NlpConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.6,
            max_file_matches: 5,
            max_alternatives: 3,
            confident_threshold: 0.7,
            context_window: 10,
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            execution_threshold: 0.6,
            recency_window_secs: 3600,
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 30,
            max_flows_per_user: 3,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_vaultmind_dir()
            .join("vaultmind.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            history_enabled: true,
        }
    }
}

/// Returns `~/.vaultmind/`, or `./.vaultmind/` when no home directory is known.
pub fn default_vaultmind_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vaultmind")
}

/// Returns the default config file path: `~/.vaultmind/config.toml`
pub fn default_config_path() -> PathBuf {
    default_vaultmind_dir().join("config.toml")
}

impl VaultMindConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            VaultMindConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (VAULTMIND_VAULT, VAULTMIND_DB,
    /// VAULTMIND_LOG_LEVEL, VAULTMIND_OLLAMA_URL, VAULTMIND_MODEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("VAULTMIND_VAULT") {
            self.vault.root = val;
        }
        if let Ok(val) = std::env::var("VAULTMIND_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("VAULTMIND_LOG_LEVEL") {
            self.logging.log_level = val;
        }
        if let Ok(val) = std::env::var("VAULTMIND_OLLAMA_URL") {
            self.llm.base_url = val;
        }
        if let Ok(val) = std::env::var("VAULTMIND_MODEL") {
            self.llm.model = val;
        }
    }

    /// Resolve the vault root, expanding `~` if needed.
    pub fn resolved_vault_root(&self) -> PathBuf {
        expand_tilde(&self.vault.root)
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

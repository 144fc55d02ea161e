use anyhow::{Context, Result};

use vaultmind::config::VaultMindConfig;
use vaultmind::flow::ConversationFlowManager;

/// Print the registered flow templates as pretty JSON.
pub fn export(config: &VaultMindConfig) -> Result<()> {
    let manager = ConversationFlowManager::new(&config.flows);
    let json = serde_json::to_string_pretty(&manager.export_flow_data())
        .context("failed to serialize flow templates")?;
    println!("{json}");
    Ok(())
}

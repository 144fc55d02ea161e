use anyhow::Result;

use vaultmind::config::VaultMindConfig;

/// Single-shot reply.
pub async fn run(config: &VaultMindConfig, message: &str, user: Option<String>) -> Result<()> {
    let mut agent = super::build_agent(config, user)?;
    let reply = agent.chat(message).await;
    println!("{reply}");
    Ok(())
}

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use vaultmind::config::VaultMindConfig;

/// Interactive loop over stdin. `exit` or `quit` outside a flow ends it.
pub async fn run(config: &VaultMindConfig, user: Option<String>) -> Result<()> {
    let mut agent = super::build_agent(config, user)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("VaultMind: chatting with {}", config.resolved_vault_root().display());
    println!("Type /help for commands, 'exit' to leave.");

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if agent.active_flow_id().is_none() && matches!(line, "exit" | "quit") {
            break;
        }

        let reply = agent.chat(line).await;
        println!("{reply}\n");
    }

    let stats = agent.stats();
    println!(
        "Bye. {} message(s), {} tool run(s).",
        stats.messages_processed, stats.tools_executed
    );
    Ok(())
}

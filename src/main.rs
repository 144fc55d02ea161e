mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vaultmind::config::VaultMindConfig;

#[derive(Parser)]
#[command(name = "vaultmind", version, about = "Chat with your markdown note vault")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive chat session
    Chat {
        /// User id for learned preferences
        #[arg(long)]
        user: Option<String>,
    },
    /// Send a single message and print the reply
    Ask {
        /// The message to send
        message: String,
        /// User id for learned preferences
        #[arg(long)]
        user: Option<String>,
    },
    /// Inspect conversation flow templates
    Flows {
        #[command(subcommand)]
        action: FlowsAction,
    },
}

#[derive(Subcommand)]
enum FlowsAction {
    /// Print every flow template as JSON
    Export,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = VaultMindConfig::load()?;

    // Log to stderr so stdout carries only replies.
    let filter = EnvFilter::try_new(&config.logging.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Chat { user } => cli::chat::run(&config, user).await?,
        Command::Ask { message, user } => cli::ask::run(&config, &message, user).await?,
        Command::Flows { action } => match action {
            FlowsAction::Export => cli::flows::export(&config)?,
        },
    }

    Ok(())
}

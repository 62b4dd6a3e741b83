//! botloom CLI — the main entry point.
//!
//! Commands:
//! - `init`     — Write the default config file
//! - `chat`     — Interactive chat or single-message mode
//! - `history`  — Show a conversation's turns, or list conversations
//! - `plugins`  — List the enabled plugins

use clap::{Parser, Subcommand};

mod commands;
mod setup;

#[derive(Parser)]
#[command(
    name = "botloom",
    about = "botloom — a plugin-calling chat bot with durable history",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging and print turn events
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Chat with the bot
    Chat {
        /// Conversation to continue (a new one is started if omitted)
        #[arg(short, long)]
        conversation: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show a conversation's history
    History {
        /// Conversation id; lists all conversations if omitted
        conversation: Option<String>,

        /// Only show the newest N turns
        #[arg(short, long)]
        last: Option<usize>,
    },

    /// List enabled plugins
    Plugins,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { force } => commands::init::run(force).await?,
        Commands::Chat {
            conversation,
            message,
        } => commands::chat::run(conversation, message, cli.verbose).await?,
        Commands::History { conversation, last } => {
            commands::history::run(conversation, last).await?
        }
        Commands::Plugins => commands::plugins::run().await?,
    }

    Ok(())
}

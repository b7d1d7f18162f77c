mod bootstrap;
mod chat_cmd;
mod sessions_cmd;
mod terminal_output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use gatehouse_config::{config_dir, config_file_path, load_and_prepare};
use gatehouse_core::SessionOrigin;
use gatehouse_logging::{init_logger, LogOptions};

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(about = "Gatehouse: self-hosted LLM agent gateway")]
#[command(version)]
struct Cli {
    /// Config file (default: $GATEHOUSE_CONFIG_DIR/config.yaml or ~/.gatehouse/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent in a session
    Chat {
        #[arg(short, long, default_value = "cli")]
        session: String,
        /// Channel recorded when the session is created
        #[arg(long, default_value = "cli")]
        channel: String,
        /// Peer recorded when the session is created
        #[arg(long, default_value = "")]
        peer: String,
    },
    /// Summarize old history of a session
    Compact {
        #[arg(short, long)]
        session: String,
    },
    /// Show the stored history of a session
    History {
        #[arg(short, long)]
        session: String,
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// List sessions, most recently active first
    Sessions {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (dir, path) = match cli.config {
        Some(path) => {
            let dir = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            (dir, path)
        }
        None => {
            let dir = config_dir();
            let path = config_file_path(&dir);
            (dir, path)
        }
    };

    let config = load_and_prepare(&path).await?;
    init_logger(&LogOptions {
        level: config.logging.level.clone(),
        dir: config.logging.dir.clone(),
        json: config.logging.json,
    });

    let runtime = bootstrap::build(&config, &dir).await?;

    match cli.command {
        Commands::Chat {
            session,
            channel,
            peer,
        } => {
            chat_cmd::run(&runtime.engine, &session, SessionOrigin::new(channel, peer)).await?;
        }
        Commands::Compact { session } => {
            sessions_cmd::compact(&runtime.engine, &session).await?;
        }
        Commands::History { session, limit } => {
            sessions_cmd::history(runtime.store.as_ref(), &session, limit).await?;
        }
        Commands::Sessions { limit } => {
            sessions_cmd::list(runtime.store.as_ref(), limit).await?;
        }
    }

    Ok(())
}

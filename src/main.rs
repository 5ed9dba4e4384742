//! # Context Chat CLI (`ctxchat`)
//!
//! ## Usage
//!
//! ```bash
//! ctxchat --config ./config/ctxchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctxchat init` | Create the SQLite database and run schema migrations |
//! | `ctxchat ask "<utterance>"` | Stream one answer with citations |
//! | `ctxchat chat` | Interactive conversation on stdin |
//! | `ctxchat history <session>` | Print a session's turns |
//! | `ctxchat forget <session>` | Delete a session |
//! | `ctxchat import <file.jsonl>` | Load pre-embedded chunk records |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use context_chat::{chat_cmd, config, import, logging, migrate};

/// Context Chat CLI: retrieval-augmented answers with citations.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "ctxchat",
    about = "Context Chat: retrieval-augmented conversational answers with citations",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ctxchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Ask one question and stream the answer.
    Ask {
        /// Continue an existing session. A new id is generated when omitted.
        #[arg(long)]
        session: Option<String>,

        /// The question.
        utterance: String,
    },

    /// Read questions line by line from stdin within one session.
    Chat {
        #[arg(long)]
        session: Option<String>,
    },

    /// Show the turns of a live session.
    History {
        session: String,
    },

    /// Delete a session and its history.
    Forget {
        session: String,
    },

    /// Load pre-embedded chunk records (JSON Lines) into the vector store.
    Import {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        config::Config::default()
    };
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ask { session, utterance } => {
            chat_cmd::run_ask(&cfg, session, &utterance).await?;
        }
        Commands::Chat { session } => {
            chat_cmd::run_chat(&cfg, session).await?;
        }
        Commands::History { session } => {
            chat_cmd::run_history(&cfg, &session).await?;
        }
        Commands::Forget { session } => {
            chat_cmd::run_forget(&cfg, &session).await?;
        }
        Commands::Import { path } => {
            import::run_import(&cfg, &path).await?;
        }
    }

    Ok(())
}

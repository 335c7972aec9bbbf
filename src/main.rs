//! # Mailseek CLI (`mailseek`)
//!
//! Commands for database initialization, running the HTTP server, local
//! chat, and service statistics.
//!
//! ## Usage
//!
//! ```bash
//! mailseek --config ./config/mailseek.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mailseek init` | Create the SQLite database and run schema migrations |
//! | `mailseek serve` | Start the JSON HTTP server |
//! | `mailseek chat "<message>"` | Ask a question over the locally indexed email |
//! | `mailseek stats` | Print index statistics |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use mailseek::chat::ChatEngine;
use mailseek::config::{self, Config};
use mailseek::db;
use mailseek::embedding::create_provider;
use mailseek::index::VectorIndex;
use mailseek::migrate;
use mailseek::server;

/// Mailseek — email sync, semantic search, and grounded chat.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mailseek.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "mailseek",
    about = "Mailseek — email sync, semantic search, and grounded chat",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mailseek.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the document tables. This
    /// command is idempotent.
    Init,

    /// Start the JSON HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// connector, sync, chat, and stats endpoints.
    Serve,

    /// Ask a question over the locally indexed email.
    ///
    /// Runs retrieval and answer composition directly against the local
    /// database, without going through the HTTP server.
    Chat {
        /// The question to ask.
        message: String,
    },

    /// Print index statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mailseek=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = load_or_default(&cli.config, &cli.command)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Chat { message } => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            let provider = create_provider(&cfg.embedding)?;
            let engine = ChatEngine::new(
                Arc::clone(&provider),
                VectorIndex::new(pool),
                cfg.retrieval.clone(),
            );

            let reply = engine.chat(&message).await?;
            println!("{}", reply.response);
            if !reply.sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &reply.sources {
                    println!(
                        "  [{:.2}] {} — {}",
                        source.score, source.metadata.subject, source.metadata.sender
                    );
                }
            }
        }
        Commands::Stats => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            let index = VectorIndex::new(pool);
            println!("Indexed emails: {}", index.count().await?);
        }
    }

    Ok(())
}

/// Load config, falling back to defaults for commands that can run
/// without a config file (everything except `serve`, which needs a bind
/// address the operator chose).
fn load_or_default(path: &PathBuf, command: &Commands) -> anyhow::Result<Config> {
    match config::load_config(path) {
        Ok(cfg) => Ok(cfg),
        Err(e) => match command {
            Commands::Serve => Err(e),
            _ => Ok(Config::minimal(PathBuf::from("./data/mailseek.db"))),
        },
    }
}

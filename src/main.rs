//! # DocQuery CLI (`docquery`)
//!
//! ## Usage
//!
//! ```bash
//! docquery --config ./config/docquery.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docquery init` | Create the user table and the vector collection with its payload indexes |
//! | `docquery serve` | Start the HTTP server |
//! | `docquery ask --user <id> "<question>"` | Answer a question from the terminal for one user |
//!
//! Secrets (`GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`, `SECRET_KEY`,
//! `GEMINI_API_KEY`, `QDRANT_URL`, `QDRANT_API_KEY`, `FRONTEND_REDIRECT_URL`)
//! are read from the environment. Log verbosity follows `RUST_LOG`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docquery::config::{self, Secrets};
use docquery::models::SourceTag;
use docquery::services::Services;
use docquery::{db, migrate, retrieval, server};

#[derive(Parser)]
#[command(
    name = "docquery",
    about = "Question answering over your uploaded PDF documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docquery.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the user table and the vector collection. Safe to re-run.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Answer a question over one user's documents.
    Ask {
        question: String,

        /// User id (the identity provider's subject) whose documents are searched.
        #[arg(long)]
        user: String,

        /// Which uploads to search: `report` or `document`.
        #[arg(long)]
        source: Option<SourceTag>,
    },
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docquery=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");

            let secrets = Secrets::from_env(&cfg)?;
            let services = Services::from_config(&cfg, &secrets).await?;
            println!(
                "Vector collection '{}' ready ({} dims, backend: {}).",
                cfg.vector_store.collection,
                services.embedder.dims(),
                services.store.name()
            );
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ask {
            question,
            user,
            source,
        } => {
            let secrets = Secrets::from_env(&cfg)?;
            let services = Services::from_config(&cfg, &secrets).await?;
            let source = source.unwrap_or(cfg.retrieval.default_source);
            let answer =
                retrieval::answer_question(&services, &cfg.retrieval, &user, source, &question)
                    .await?;
            println!("{}", answer);
        }
    }

    Ok(())
}

//! # chat-kb CLI (`kb`)
//!
//! Operator surface for the retrieval engine: initialize the store, run
//! ingestion, refresh after corpus edits, and inspect search results and
//! index health. The chat application consumes the same engine through the
//! library API.
//!
//! ## Usage
//!
//! ```bash
//! kb --config ./config/kb.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb init` | Create the SQLite database and schema |
//! | `kb ingest` | Scan the corpus and build (or reuse) the index |
//! | `kb refresh` | Re-scan the corpus for added/changed/removed files |
//! | `kb search "<query>"` | Run a retrieval query |
//! | `kb status` | Show the ingestion ledger and usage counters |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use chat_kb::config;
use chat_kb::db;
use chat_kb::engine::RetrievalEngine;
use chat_kb::migrate;
use chat_kb::status;

/// chat-kb — a local retrieval-augmented context engine for chat
/// applications.
#[derive(Parser)]
#[command(
    name = "kb",
    about = "chat-kb — local retrieval-augmented context over tabular knowledge files",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file, the documents and ledger tables,
    /// and the FTS5 index. Idempotent.
    Init,

    /// Scan the corpus directory and build or reuse the index.
    ///
    /// Performs a full rebuild when the index is absent or any source file
    /// is newer than the index; otherwise loads the existing store without
    /// re-parsing.
    Ingest,

    /// Re-scan the corpus for added, changed, and removed files.
    Refresh,

    /// Run a retrieval query and print ranked results.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show the ingestion ledger, embedding coverage, and usage counters.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest => {
            let engine = RetrievalEngine::connect(cfg).await?;
            let outcome = engine.initialize().await?;
            println!("ingest");
            println!("  files seen: {}", outcome.files_seen);
            if outcome.files_failed > 0 {
                println!("  files failed: {}", outcome.files_failed);
            }
            println!(
                "  mode: {}",
                if outcome.full_rebuild {
                    "full rebuild"
                } else {
                    "reused existing index"
                }
            );
            println!("  documents: {}", outcome.documents);
            println!("ok");
        }
        Commands::Refresh => {
            let engine = RetrievalEngine::connect(cfg).await?;
            engine.initialize().await?;
            let outcome = engine.refresh().await?;
            println!("refresh");
            println!("  files added: {}", outcome.files_added);
            println!("  files re-ingested: {}", outcome.files_reingested);
            println!("  files removed: {}", outcome.files_removed);
            if outcome.files_failed > 0 {
                println!("  files failed: {}", outcome.files_failed);
            }
            println!("  documents upserted: {}", outcome.documents_upserted);
            println!("  documents pruned: {}", outcome.documents_pruned);
            println!("ok");
        }
        Commands::Search { query, limit } => {
            let limit = limit.unwrap_or(cfg.retrieval.default_limit);
            let engine = RetrievalEngine::connect(cfg).await?;
            engine.initialize().await?;

            let results = engine.search(&query, limit).await;
            if results.is_empty() {
                println!("No results.");
            } else {
                for (i, result) in results.iter().enumerate() {
                    println!(
                        "{}. [{:.2}] ({})",
                        i + 1,
                        result.score,
                        result.provenance.as_str()
                    );
                    for line in result.content.lines() {
                        println!("    {}", line);
                    }
                    println!();
                }
            }
        }
        Commands::Status => {
            let engine = RetrievalEngine::connect(cfg).await?;
            status::run_status(&engine).await?;
        }
    }

    Ok(())
}

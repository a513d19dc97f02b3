//! memoria-enginectl: operator CLI for one tenant's memory store.
//!
//! Mirrors the teacher's `cli.rs` shape (a clap `Commands` enum dispatched
//! against one opened store) generalized to this engine's async write/read
//! path and control plane.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memoria::config::Config;
use memoria::control_plane::ControlPlane;
use memoria::engine::{CancellationToken, MemoryEngine, MemoryEngineBuilder};
use memoria::error::Result;
use memoria::storage::sqlite::SqliteRecordStore;
use memoria::types::{CreateMemoryInput, Requester, UndoId};

#[derive(Parser)]
#[command(name = "memoria-enginectl")]
#[command(about = "Operator CLI for the memoria memory engine")]
#[command(version)]
struct Cli {
    /// Config file (TOML); falls back to defaults plus MEMORIA_* env vars.
    #[arg(long, env = "MEMORIA_CONFIG")]
    config: Option<PathBuf>,

    /// Tenant to operate on.
    #[arg(long, env = "MEMORIA_USER_ID", default_value = "default")]
    user_id: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a memory
    Add {
        text: String,
        #[arg(short, long, default_value = "a1")]
        agent_id: String,
    },
    /// Get a memory by id
    Get { id: uuid::Uuid },
    /// Delete a memory by id
    Delete { id: uuid::Uuid },
    /// List recent memories
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Hybrid search
    Search {
        query: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Undo a reversible operation
    Undo { undo_id: UndoId },
    /// Composite adapter health
    Health,
    /// Per-tenant memory/session counts
    Stats,
    /// Rolling latency percentiles
    Perf,
    /// Run the dedup sweep (dry-run unless --apply)
    Dedup {
        #[arg(long)]
        apply: bool,
    },
}

fn open_engine(config: Config) -> Result<MemoryEngine> {
    std::fs::create_dir_all(&config.storage.data_dir)?;
    let db_path = PathBuf::from(&config.storage.data_dir).join("memoria.db");
    let record_store = Arc::new(SqliteRecordStore::open(&db_path)?);
    Ok(MemoryEngineBuilder::new(config).record_store(record_store).build())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let engine = Arc::new(open_engine(config)?);
    let control_plane = ControlPlane::new(engine.clone());
    let requester = Requester {
        user_id: cli.user_id.clone(),
        agent_id: String::new(),
    };

    match cli.command {
        Commands::Add { text, agent_id } => {
            let memory = engine
                .add_memory(
                    CreateMemoryInput {
                        text,
                        agent_id,
                        user_id: cli.user_id,
                        ..Default::default()
                    },
                    CancellationToken::new(),
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&memory)?);
        }

        Commands::Get { id } => {
            let memory = engine.get_memory(id, &requester).await?;
            println!("{}", serde_json::to_string_pretty(&memory)?);
        }

        Commands::Delete { id } => {
            engine.delete_memory(id).await?;
            println!("deleted {}", id);
        }

        Commands::List { limit } => {
            let page = engine
                .list_memories(Default::default(), &requester, limit, None)
                .await?;
            for memory in page.items {
                println!("{} [{}] {}", memory.id, memory.memory_type.as_str(), truncate(&memory.text, 60));
            }
        }

        Commands::Search { query, limit } => {
            let hits = engine
                .search_hybrid(&query, &requester, limit, CancellationToken::new())
                .await?;
            for hit in hits {
                println!("{:.3} {} {}", hit.score, hit.memory.id, truncate(&hit.memory.text, 50));
            }
        }

        Commands::Undo { undo_id } => {
            control_plane.undo(undo_id).await?;
            println!("undone {}", undo_id);
        }

        Commands::Health => {
            let report = control_plane.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Stats => {
            let stats = control_plane.stats(&requester.user_id).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Perf => {
            println!("{}", serde_json::to_string_pretty(&control_plane.performance_metrics())?);
        }

        Commands::Dedup { apply } => {
            if apply {
                let report = memoria::lifecycle::dedup::dry_run(&engine, &requester.user_id).await?;
                memoria::lifecycle::dedup::apply(&engine, &report).await?;
                println!("merged {} pair(s)", report.candidates.len());
            } else {
                let report = memoria::lifecycle::dedup::dry_run(&engine, &requester.user_id).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    let first_line = s.lines().next().unwrap_or(s);
    if first_line.chars().count() <= max {
        first_line.to_string()
    } else {
        format!("{}...", first_line.chars().take(max).collect::<String>())
    }
}

//! memctl: inspect and maintain a conversation memory directory. Config from env
//! (`MEMORY_*`) and optional CLI args.

mod logger;
mod offline;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memory::{ConversationMemory, MemoryConfig};
use memory_sqlite::SQLiteDocumentStore;
use prompt::MessageRole;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const TURN_COLLECTION: &str = "turns";
const SUMMARY_COLLECTION: &str = "summaries";
const CONTENT_PREVIEW_LEN: usize = 80;

#[derive(Parser)]
#[command(name = "memctl")]
#[command(about = "Conversation memory CLI: stats, reconcile, history, context, wipe", long_about = None)]
#[command(version)]
struct Cli {
    /// Memory directory; overrides MEMORY_DATA_DIR.
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,
    /// Also append logs to this file.
    #[arg(long, global = true)]
    log_file: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show ledger counters, store sizes and long-term memory.
    Stats,
    /// Reconcile the ledger with the stores and report what was repaired.
    Reconcile,
    /// List the most recent turn pairs, oldest first.
    History {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Preview the context that would be sent for a query (no similarity tiers).
    Context {
        #[arg(short, long, default_value = "")]
        query: String,
        #[arg(long, default_value = "1")]
        min_recent_pairs: usize,
        #[arg(long)]
        max_tokens: Option<usize>,
    },
    /// Delete all turns, summaries, the ledger state and long-term memory.
    Wipe {
        /// Required; wiping cannot be undone.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    logger::init_tracing(cli.log_file.as_deref())?;

    let mut config = MemoryConfig::from_env().context("Load memory config from MEMORY_* env")?;
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }

    match cli.command {
        Commands::Stats => handle_stats(config).await,
        Commands::Reconcile => handle_reconcile(config).await,
        Commands::History { limit } => handle_history(config, limit).await,
        Commands::Context {
            query,
            min_recent_pairs,
            max_tokens,
        } => handle_context(config, &query, min_recent_pairs, max_tokens).await,
        Commands::Wipe { yes } => handle_wipe(config, yes).await,
    }
}

/// Opens the memory over the SQLite database in the data directory.
async fn open_memory(config: MemoryConfig) -> Result<ConversationMemory> {
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("Create data dir {}", config.data_dir.display()))?;
    let db_path = config.sqlite_path();
    let db_path = db_path
        .to_str()
        .context("SQLite path is not valid UTF-8")?;

    let turns = SQLiteDocumentStore::new(db_path, TURN_COLLECTION)
        .await
        .context("Open turn store")?;
    let summaries = SQLiteDocumentStore::from_pool(turns.pool().clone(), SUMMARY_COLLECTION)
        .await
        .context("Open summary store")?;

    let memory = ConversationMemory::open(
        config,
        Arc::new(turns),
        Arc::new(summaries),
        offline::adapters(),
    )
    .await
    .context("Open conversation memory")?;
    info!(data_dir = %memory.config().data_dir.display(), "Memory opened");
    Ok(memory)
}

async fn handle_stats(config: MemoryConfig) -> Result<()> {
    let memory = open_memory(config).await?;
    let ledger = memory.ledger_snapshot().await;
    let counts = memory.store_counts().await?;
    let long_term = memory.long_term_memory().await;
    info!(turns = counts.turns, summaries = counts.summaries, "Stats collected");

    println!("Data dir:         {}", memory.config().data_dir.display());
    println!("Next turn id:     {}", ledger.next_turn_id);
    println!("Next summary id:  {}", ledger.next_summary_id);
    match &ledger.pending_pair {
        Some(pair) => {
            let (user_id, assistant_id) = pair.ids();
            println!("Pending pair:     ({user_id}, {assistant_id})");
        }
        None => println!("Pending pair:     -"),
    }
    println!("Turns stored:     {}", counts.turns);
    println!("Summaries stored: {}", counts.summaries);
    println!("Context budget:   {} tokens", memory.config().default_max_tokens());
    if long_term.is_empty() {
        println!("Long-term memory: (empty)");
    } else {
        println!("Long-term memory:\n{long_term}");
    }
    Ok(())
}

async fn handle_reconcile(config: MemoryConfig) -> Result<()> {
    let memory = open_memory(config).await?;
    let report = memory.reconcile_report();
    info!(clean = report.is_clean(), "Reconcile finished");

    if report.is_clean() {
        println!("Ledger and stores are consistent.");
        return Ok(());
    }
    println!("Repaired:");
    println!("  turn ids rewound:     {}", report.turn_ids_rewound);
    println!("  summary ids rewound:  {}", report.summary_ids_rewound);
    println!("  turns removed:        {:?}", report.removed_turns);
    println!("  summaries removed:    {:?}", report.removed_summaries);
    if let Some((user_id, assistant_id)) = report.recovered_pending_pair {
        println!("  recovered pending:    ({user_id}, {assistant_id})");
    }
    Ok(())
}

async fn handle_history(config: MemoryConfig, limit: usize) -> Result<()> {
    let memory = open_memory(config).await?;
    let pairs = memory.recent_pairs(limit).await.context("Read recent pairs")?;
    info!(limit, found = pairs.len(), "History loaded");

    if pairs.is_empty() {
        println!("No turns recorded.");
        return Ok(());
    }

    println!("{:<6} {:<10} {:<20} {}", "id", "role", "model", "content_preview");
    println!("{}", "-".repeat(120));
    for pair in &pairs {
        for entry in [&pair.user, &pair.assistant] {
            let role = MessageRole::from(entry.role);
            println!(
                "{:<6} {:<10} {:<20} {}",
                entry.id,
                role.as_str(),
                entry.model.as_deref().unwrap_or("-"),
                preview(&entry.content)
            );
        }
    }
    Ok(())
}

async fn handle_context(
    config: MemoryConfig,
    query: &str,
    min_recent_pairs: usize,
    max_tokens: Option<usize>,
) -> Result<()> {
    let memory = open_memory(config).await?;
    let context = memory
        .gather_context(query, min_recent_pairs, max_tokens)
        .await
        .context("Assemble context")?;
    info!(
        total_tokens = context.metadata.total_tokens,
        token_limit = context.metadata.token_limit,
        "Context preview assembled"
    );

    let meta = &context.metadata;
    println!(
        "{} message(s), {}/{} tokens; recent pairs {}, backfilled summaries {}",
        context.messages.len(),
        meta.total_tokens,
        meta.token_limit,
        meta.tiers.recent_pairs,
        meta.tiers.backfilled_summaries
    );
    println!("{}", "-".repeat(120));
    for message in &context.messages {
        println!("{:<10} {}", message.role.as_str(), preview(&message.content));
    }
    Ok(())
}

async fn handle_wipe(config: MemoryConfig, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("Refusing to wipe {} without --yes", config.data_dir.display());
    }
    let mut memory = open_memory(config).await?;
    warn!(data_dir = %memory.config().data_dir.display(), "Wiping conversation memory");
    memory.wipe().await.context("Wipe memory")?;
    println!("Memory wiped.");
    Ok(())
}

fn preview(content: &str) -> String {
    let flat = content.replace('\n', " ");
    match flat.char_indices().nth(CONTENT_PREVIEW_LEN) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

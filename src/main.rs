//! # vault-kb CLI (`vkb`)
//!
//! The `vkb` binary drives a note vault's knowledge base from the command
//! line: trigger syncs, check sync status, ask questions with cited
//! streaming answers, or follow the vault continuously.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vkb sync` | Index the vault's pending changes |
//! | `vkb status <sync-id>` | Check an indexing job on demand |
//! | `vkb ask "<question>"` | Stream a cited answer to one question |
//! | `vkb watch` | Watch the vault and sync on a periodic tick |
//! | `vkb delete-all` | Remove all indexed data |
//!
//! ## Examples
//!
//! ```bash
//! vkb sync --config ./vkb.toml
//! vkb ask "what did I note about borrow checking?" --config ./vkb.toml
//! vkb watch --config ./vkb.toml
//! ```

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use uuid::Uuid;

use vault_kb::config::{load_config, Config};
use vault_kb::kb::{create_knowledge_base, KnowledgeBase};
use vault_kb::models::SyncStatus;
use vault_kb::sync::{SyncCoordinator, SyncEvent, SyncOptions};
use vault_kb::tracker::ChangeTracker;
use vault_kb::vault::{self, ExclusionFilter};
use vault_kb::watcher;

/// vault-kb CLI: a retrieval-augmented knowledge base for note vaults.
#[derive(Parser)]
#[command(
    name = "vkb",
    about = "vault-kb — index a note vault and query it with cited answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./vkb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the vault's pending changes into the knowledge base.
    ///
    /// A one-shot invocation has no watcher history, so the whole vault
    /// is treated as pending.
    Sync {
        /// Force a full-vault sync. Accepted for forward compatibility;
        /// currently identical to an incremental sync.
        #[arg(long)]
        all_vault: bool,
    },

    /// Check the status of an indexing job.
    Status {
        /// Sync id returned by `vkb sync`.
        sync_id: String,
    },

    /// Ask one question and stream the cited answer.
    Ask {
        /// The question to answer from the vault.
        question: String,

        /// Chat id for conversational continuity across invocations of a
        /// long-running process. A fresh id is generated when omitted.
        #[arg(long)]
        chat_id: Option<String>,

        /// Number of chunks to retrieve.
        #[arg(short = 'k', long)]
        results: Option<usize>,
    },

    /// Watch the vault and sync changes on a periodic tick.
    Watch,

    /// Remove all indexed data and conversational state.
    DeleteAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let kb = create_knowledge_base(&config)?;

    match cli.command {
        Commands::Sync { all_vault } => run_sync(&config, kb, all_vault).await,
        Commands::Status { sync_id } => run_status(kb, &sync_id).await,
        Commands::Ask {
            question,
            chat_id,
            results,
        } => run_ask(&config, kb, &question, chat_id, results).await,
        Commands::Watch => run_watch(&config, kb).await,
        Commands::DeleteAll => {
            kb.delete_all_data().await?;
            println!("ok");
            Ok(())
        }
    }
}

fn build_coordinator(
    config: &Config,
    kb: Arc<dyn KnowledgeBase>,
    tracker: Arc<ChangeTracker>,
) -> Result<(
    SyncCoordinator,
    tokio::sync::mpsc::UnboundedReceiver<SyncEvent>,
)> {
    let filter = ExclusionFilter::from_config(&config.vault)?;
    Ok(SyncCoordinator::new(
        kb,
        tracker,
        filter,
        Duration::from_secs(config.sync.poll_interval_secs),
    ))
}

async fn run_sync(config: &Config, kb: Arc<dyn KnowledgeBase>, all_vault: bool) -> Result<()> {
    let tracker = Arc::new(ChangeTracker::new());
    for file in vault::scan_vault(&config.vault)? {
        tracker.record_create(file);
    }

    let (coordinator, mut events) = build_coordinator(config, kb, tracker)?;
    let job = coordinator.start_sync(SyncOptions { all_vault }).await?;
    println!("sync started: {}", job.sync_id);

    while let Some(event) = events.recv().await {
        eprintln!("{}", event.notice);
        if event.status.is_terminal() {
            if event.status == SyncStatus::Failed {
                anyhow::bail!("sync {} failed", job.sync_id);
            }
            break;
        }
    }

    println!("ok");
    Ok(())
}

async fn run_status(kb: Arc<dyn KnowledgeBase>, sync_id: &str) -> Result<()> {
    let status = kb.get_sync_status(sync_id).await?;
    println!("{status}");
    Ok(())
}

async fn run_ask(
    config: &Config,
    kb: Arc<dyn KnowledgeBase>,
    question: &str,
    chat_id: Option<String>,
    results: Option<usize>,
) -> Result<()> {
    let chat_id = chat_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let k = results.unwrap_or(config.retrieval.number_of_results);

    let mut stream = kb.query_stream(question, &chat_id, k);
    let mut citations = Vec::new();

    while let Some(response) = stream.next().await {
        let response = response.context("query turn failed")?;
        if !response.text.is_empty() {
            print!("{}", response.text);
            std::io::stdout().flush().ok();
        }
        citations.extend(response.citations);
    }
    println!();

    if !citations.is_empty() {
        println!("\nSources:");
        for (i, citation) in citations.iter().enumerate() {
            for reference in &citation.references {
                let name = if reference.file_name.is_empty() {
                    "(unresolved)"
                } else {
                    reference.file_name.as_str()
                };
                println!("  [{}] {}", i + 1, name);
            }
        }
    }

    Ok(())
}

async fn run_watch(config: &Config, kb: Arc<dyn KnowledgeBase>) -> Result<()> {
    let tracker = Arc::new(ChangeTracker::new());
    let _watcher = watcher::watch_vault(&config.vault, Arc::clone(&tracker))?;

    let (coordinator, mut events) = build_coordinator(config, kb, Arc::clone(&tracker))?;
    let coordinator = Arc::new(coordinator);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            eprintln!("[{}] {}", event.at.format("%H:%M:%S"), event.notice);
        }
    });

    // The watcher seeded the tracker with the current vault content, so
    // the startup sync indexes everything that already exists.
    if let Err(e) = coordinator.start_sync(SyncOptions::default()).await {
        eprintln!("startup sync failed: {e}");
    }

    tokio::spawn(
        Arc::clone(&coordinator).run_periodic(Duration::from_secs(config.sync.sync_interval_secs)),
    );

    eprintln!(
        "watching {} (sync every {}s, ctrl-c to stop)",
        config.vault.root.display(),
        config.sync.sync_interval_secs
    );
    tokio::signal::ctrl_c().await?;
    Ok(())
}

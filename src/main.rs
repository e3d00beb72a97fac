mod cli;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Parser as _;
use cloak_core::config::{Config, LogConfig};
use cloak_core::engine::{Engine, EngineStatus, SnapshotState};
use cloak_index::indexer::IndexOutcome;
use cloak_index::retriever::RetrievedChunk;
use cloak_index::watcher::DEFAULT_DEBOUNCE;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    init_subscriber(&config.log)?;

    let engine = Engine::bootstrap(config)?;
    let result = run(&engine, cli.command).await;
    engine.shutdown();
    result
}

async fn run(engine: &Engine, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Index { tree, watch } => {
            let outcome = engine
                .index(&tree)
                .await
                .with_context(|| format!("failed to index {}", tree.display()))?;
            match &outcome {
                IndexOutcome::UpToDate { revision } => {
                    tracing::info!(tree = %tree.display(), revision = %revision, "index command: up to date");
                }
                IndexOutcome::Rebuilt(report) => tracing::info!(
                    tree = %tree.display(),
                    files = report.files_indexed,
                    chunks = report.chunks_created,
                    "index command: rebuilt"
                ),
            }
            print_outcome(&outcome);
            if watch {
                let watcher = engine.watch(&tree, DEFAULT_DEBOUNCE)?;
                tracing::info!(tree = %tree.display(), debounce_secs = DEFAULT_DEBOUNCE.as_secs(), "watch mode started");
                println!("watching {} (ctrl-c to stop)", tree.display());
                tokio::signal::ctrl_c()
                    .await
                    .context("failed to listen for ctrl-c")?;
                drop(watcher);
                tracing::info!(tree = %tree.display(), "watch mode stopped");
            }
        }
        Commands::Search {
            query,
            top_k,
            alpha,
            json,
            context,
        } => {
            let hits = engine.search(&query, top_k, alpha).await?;
            tracing::debug!(results = hits.len(), "search command complete");
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if context {
                println!("{}", engine.context_for(&hits));
            } else {
                print_hits(&hits);
            }
        }
        Commands::Status { tree, json } => {
            let status = engine.status(&tree)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
    }
    Ok(())
}

/// Priority: `--config` > `CLOAK_CONFIG` > `config/default.toml`.
fn resolve_config_path(cli_path: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_path {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("CLOAK_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn init_subscriber(log: &LogConfig) -> anyhow::Result<()> {
    use tracing_subscriber::Layer as _;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let file_layer = match &log.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn print_outcome(outcome: &IndexOutcome) {
    match outcome {
        IndexOutcome::UpToDate { revision } => println!("index up to date at {revision}"),
        IndexOutcome::Rebuilt(report) => {
            println!(
                "indexed {} files ({} chunks, {} skipped) in {} ms",
                report.files_indexed,
                report.chunks_created,
                report.files_skipped,
                report.duration_ms
            );
            match &report.revision {
                Some(rev) => println!("revision {rev}"),
                None => println!("tree is not under version control; it will be rebuilt on every run"),
            }
            for err in &report.errors {
                eprintln!("warning: {err}");
            }
        }
    }
}

fn print_hits(hits: &[RetrievedChunk]) {
    if hits.is_empty() {
        println!("no results");
        return;
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. {} [{}/{}] score={:.4}",
            rank + 1,
            hit.source_path,
            hit.chunk_index + 1,
            hit.total_chunks,
            hit.score
        );
        if !hit.symbols.is_empty() {
            println!("   symbols: {}", hit.symbols.join(", "));
        }
    }
}

fn print_status(status: &EngineStatus) {
    println!("tree:       {}", status.tree.display());
    println!("index dir:  {}", status.index_dir.display());
    println!(
        "recorded:   {}",
        status.recorded_revision.as_deref().unwrap_or("none")
    );
    println!(
        "observed:   {}",
        status.observed_revision.as_deref().unwrap_or("untracked")
    );
    println!("rebuild:    {}", if status.needs_rebuild { "needed" } else { "not needed" });
    match &status.snapshot {
        SnapshotState::Ready { chunks, files } => {
            println!("snapshot:   ready ({chunks} chunks from {files} files)");
        }
        SnapshotState::NotBuilt { missing } => println!("snapshot:   not built ({missing})"),
        SnapshotState::Corrupt { artifact, reason } => {
            println!("snapshot:   corrupt ({artifact}: {reason})");
        }
    }
}

use anyhow::{Context, Result, anyhow};
use batchdb::{
    BatchConfig, BatchCoordinator, BatchOptions, Column, Comparison, Criteria, DataType,
    DiagnosticLogger, Entity, EntitySchema, MemorySession, Session, SessionStats, SharedLogger,
    batch_options,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "batch-tool")]
#[command(about = "Runs batch operations against an in-memory session and reports the work done")]
struct Cli {
    /// Items per flush/clear boundary (<= 0 synchronizes only at the end)
    #[arg(long, default_value_t = 20, allow_negative_numbers = true)]
    batch_size: i64,

    /// Do not flush at boundaries (persist and remove flush regardless)
    #[arg(long)]
    no_flush: bool,

    /// Do not clear the identity map at boundaries
    #[arg(long)]
    no_clear: bool,

    /// Print every statement issued outside of batch runs
    #[arg(long)]
    echo_sql: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Persist generated items
    Persist {
        #[arg(long, default_value_t = 1000)]
        count: i64,
    },
    /// Seed items, then stream those scoring at least `min_score`
    Iterate {
        #[arg(long, default_value_t = 1000)]
        count: i64,
        #[arg(long, default_value_t = 0)]
        min_score: i64,
    },
    /// Seed items, then remove those scoring below `max_score`
    RemoveBy {
        #[arg(long, default_value_t = 1000)]
        count: i64,
        #[arg(long, default_value_t = 50)]
        max_score: i64,
    },
}

#[derive(Serialize)]
struct Report {
    command: &'static str,
    processed: usize,
    rows: usize,
    config: BatchConfig,
    stats: SessionStats,
}

struct StdoutLogger;

impl DiagnosticLogger for StdoutLogger {
    fn log_statement(&self, statement: &str) {
        println!("[sql] {}", statement);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let session = Arc::new(MemorySession::new());
    session
        .register(EntitySchema::new(
            "item",
            vec![
                Column::new("id", DataType::Integer).not_null(),
                Column::new("label", DataType::Text),
                Column::new("score", DataType::Integer),
            ],
        ))
        .context("Failed to register item schema")?;
    if cli.echo_sql {
        let logger: SharedLogger = Arc::new(StdoutLogger);
        session.set_diagnostic_logger(Some(logger));
    }

    let options = batch_options(json!({
        "batch_size": cli.batch_size,
        "flush_auto": !cli.no_flush,
        "clear_auto": !cli.no_clear,
    }));
    let coordinator = BatchCoordinator::new(session.clone());

    let (command, processed) = match cli.command {
        Command::Persist { count } => ("persist", seed(&coordinator, count, &options).await?),
        Command::Iterate { count, min_score } => {
            seed(&coordinator, count, &options).await?;
            let criteria = Criteria::new().where_cmp("score", Comparison::Gte, min_score);
            let mut result = coordinator
                .iterate_by("item", &criteria, &options)
                .context("Failed to build item query")?;

            let mut processed = 0;
            while result.next().await?.is_some() {
                processed += 1;
            }
            ("iterate", processed)
        }
        Command::RemoveBy { count, max_score } => {
            seed(&coordinator, count, &options).await?;
            let criteria = Criteria::new().where_cmp("score", Comparison::Lt, max_score);
            let removed = coordinator
                .remove_by("item", &criteria, &options)
                .await
                .context("Failed to remove items")?;
            ("remove-by", removed)
        }
    };

    let report = Report {
        command,
        processed,
        rows: session.row_count(&"item".into())?,
        config: BatchConfig::from_options(&options),
        stats: session.stats(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn seed(
    coordinator: &BatchCoordinator<MemorySession>,
    count: i64,
    options: &BatchOptions,
) -> Result<usize> {
    if count < 0 {
        return Err(anyhow!("--count must not be negative, got {}", count));
    }

    let items: Vec<Entity> = (1..=count)
        .map(|id| {
            Entity::new("item")
                .with("id", id)
                .with("label", format!("item-{}", id))
                .with("score", id * 37 % 100)
        })
        .collect();

    coordinator
        .persist(items, options)
        .await
        .with_context(|| format!("Failed to persist {} items", count))
}

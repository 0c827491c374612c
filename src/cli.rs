//! CLI interface for intent-desk

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::app::{open_dataset, open_store, App};
use crate::config::{self, Config};
use crate::review::{Correction, CorrectionService};
use crate::types::Interaction;

/// Upper bound on batches for `evaluate --all`
const MAX_DRAIN_BATCHES: usize = 1000;

#[derive(Parser)]
#[command(name = "intent-desk")]
#[command(about = "Intent-routed support chatbot with quality review and retraining feedback", long_about = None)]
#[command(version)]
struct Cli {
    /// Use this config file instead of the default location
    #[arg(long, global = true, env = "INTENT_DESK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Ask the quality oracle about unevaluated interactions
    Evaluate {
        /// Rows per batch (defaults to evaluator.batch_size)
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Keep running batches until nothing is left
        #[arg(long)]
        all: bool,
    },
    /// List interactions awaiting review
    Review {
        #[command(subcommand)]
        queue: ReviewQueue,
    },
    /// Correct the intent of one interaction
    Correct {
        /// Interaction id
        id: i64,
        /// Existing or new intent tag
        tag: String,
        /// Response to add to the intent
        #[arg(short, long)]
        response: Option<String>,
    },
    /// Show the most recent exchanges
    History {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show interaction log statistics
    Stats,
    /// Create the interaction database and intents document if missing
    InitDb,
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ReviewQueue {
    /// Unreviewed interactions, oldest first
    General,
    /// Oracle-flagged interactions, newest first
    Flagged,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::config_path()?,
    };

    match cli.command {
        Commands::Serve { host, port } => {
            let config = Config::load_from(&config_path)?;
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let app = App::open(config).await?;
            crate::server::start(app, &host, port).await?;
        }
        Commands::Evaluate { batch_size, all } => {
            let config = Config::load_from(&config_path)?;
            let batch_size = batch_size.unwrap_or(config.evaluator.batch_size);
            if batch_size == 0 {
                bail!("batch size must be at least 1");
            }
            let app = App::open(config).await?;

            let report = if all {
                app.evaluator
                    .run_until_drained(batch_size, MAX_DRAIN_BATCHES)
                    .await?
            } else {
                app.evaluator.run_batch(batch_size).await?
            };

            println!("Evaluated {} interaction(s)", report.selected);
            println!("  Match:       {}", report.matched);
            println!("  Mismatch:    {}", report.mismatched);
            println!("  Malformed:   {}", report.malformed);
            println!("  Unreachable: {}", report.unreachable);
        }
        Commands::Review { queue } => {
            let config = Config::load_from(&config_path)?;
            let service = review_service(&config).await?;
            let rows = match queue {
                ReviewQueue::General => service.list_for_general_review().await?,
                ReviewQueue::Flagged => service.list_for_flagged_review().await?,
            };
            display_interactions(&rows);
        }
        Commands::Correct { id, tag, response } => {
            let config = Config::load_from(&config_path)?;
            let service = review_service(&config).await?;

            let mut correction = Correction::new(id, tag);
            correction.new_response = response;
            let report = service.apply_corrections(vec![correction]).await?;

            if !report.applied.is_empty() {
                println!("Corrected interaction {}", id);
                for tag in &report.created_intents {
                    println!("Created intent '{}'", tag);
                }
                println!("Dataset version: {}", report.dataset_version);
            } else if !report.unchanged.is_empty() {
                println!("Interaction {} already carries that tag", id);
            } else if !report.skipped_conflict.is_empty() {
                bail!("interaction {} was already corrected to a different tag", id);
            } else if !report.skipped_unknown.is_empty() {
                bail!("interaction {} not found", id);
            } else if report.skipped_blank > 0 {
                bail!("tag must not be empty");
            } else {
                bail!("correction of interaction {} failed", id);
            }
        }
        Commands::History { limit } => {
            let config = Config::load_from(&config_path)?;
            let store = open_store(&config).await?;
            let turns = store.fetch_recent_history(limit).await?;
            if turns.is_empty() {
                println!("No interactions logged yet.");
            }
            for turn in turns.iter().rev() {
                println!("User: {}", turn.message);
                println!("Bot:  {}", turn.response);
                println!();
            }
        }
        Commands::Stats => {
            let config = Config::load_from(&config_path)?;
            let store = open_store(&config).await?;
            let dataset = open_dataset(&config)?;
            let stats = store.stats().await?;
            let snapshot = dataset.snapshot();

            println!("Interaction log");
            println!("  Total:        {}", stats.total);
            println!("  Unevaluated:  {}", stats.unevaluated);
            println!("  Match:        {}", stats.matched);
            println!("  Mismatch:     {}", stats.mismatched);
            println!("  Corrected:    {}", stats.corrected);
            println!("Intents");
            println!("  Tags:         {}", snapshot.intents.len());
            println!("  Version:      {}", snapshot.version);
        }
        Commands::InitDb => {
            let config = Config::load_from(&config_path)?;
            open_store(&config).await?;
            open_dataset(&config)?;
            println!("Interaction log: {}", config.storage.database_path.display());
            println!("Intents:         {}", config.storage.intents_path.display());
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let config = Config::load_from(&config_path)?;
                print!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigCommands::Path => {
                println!("{}", config_path.display());
            }
        },
    }

    Ok(())
}

async fn review_service(config: &Config) -> Result<CorrectionService> {
    let store = open_store(config).await?;
    let dataset = open_dataset(config)?;
    Ok(CorrectionService::new(
        store,
        dataset,
        config.review.general_queue,
    ))
}

fn display_interactions(rows: &[Interaction]) {
    if rows.is_empty() {
        println!("Nothing to review.");
        return;
    }

    println!("{} interaction(s):\n", rows.len());
    for row in rows {
        println!(
            "#{} [{}] intent={} confidence={:.2} oracle={}",
            row.id,
            row.timestamp.format("%Y-%m-%d %H:%M:%S"),
            row.predicted_intent.as_deref().unwrap_or("-"),
            row.confidence,
            row.gemini_flag
        );
        println!("   User: {}", row.message);
        println!("   Bot:  {}", row.response);
        if let Some(feedback) = &row.gemini_feedback {
            println!("   Oracle: {}", feedback);
        }
        println!();
    }
}

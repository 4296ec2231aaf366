//! # Discovery Harness CLI (`disco`)
//!
//! ## Usage
//!
//! ```bash
//! disco --config ./config/disco.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `disco init` | Create the SQLite database and run schema migrations |
//! | `disco ingest <paths...>` | Ingest files or whole directories |
//! | `disco search "<query>"` | Ranked search with optional metadata filters |
//! | `disco get <id>` | Show one document and its fragments |
//! | `disco runs` | List ingestion runs |
//! | `disco dead-letters` | List failed ingestions |
//! | `disco neighbors <node>` | Knowledge-graph neighbors of a document or value |
//! | `disco timeline` | Date chronology, optionally exported as CSV |
//! | `disco reindex` | Rebuild the retrieval index |
//! | `disco stats` | Corpus statistics |
//! | `disco delegate "<prompt>"` | Ask the configured agents |
//! | `disco conversation <trace>` | Replay a delegation's conversation memory |
//!
//! Logs go to stderr; set `DISCOVERY_LOG` to override the `-v`/`--quiet` level.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use discovery_harness::{
    agents, config, get, ingest, migrate, runs, search, stats, timeline, Engine,
};

/// Discovery Harness: ingestion, classification and graph-aware search for
/// document productions.
#[derive(Parser)]
#[command(
    name = "disco",
    about = "Discovery Harness: ingest, classify, link and search document productions",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/disco.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest files and directories.
    ///
    /// Directories are walked recursively, keeping files with an allowed
    /// extension and skipping `ingestion.exclude_globs`. A failing file does
    /// not stop the batch.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Label recorded on every run and document (e.g. a production volume).
        #[arg(long, default_value = "cli")]
        source: String,

        /// Print the batch report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search ingested documents.
    Search {
        query: String,

        /// Soft metadata filter, `key=value[,value]`. Repeatable.
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Maximum number of results (defaults to `retrieval.default_top_k`).
        #[arg(long)]
        limit: Option<usize>,

        /// Show the score breakdown for each hit.
        #[arg(long)]
        explain: bool,

        #[arg(long)]
        json: bool,
    },

    /// Show a document by its external id.
    Get {
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// List ingestion runs, newest first.
    Runs {
        /// Only runs in this state: running, completed or failed.
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: i64,

        #[arg(long)]
        json: bool,
    },

    /// List dead letters, newest first.
    DeadLetters {
        #[arg(long, default_value_t = 50)]
        limit: i64,

        #[arg(long)]
        json: bool,
    },

    /// List knowledge-graph neighbors of a node.
    ///
    /// Nodes are document ids (`doc-…`) or metadata values (`entities:Alice Corp`).
    Neighbors { node: String },

    /// Show the date timeline.
    Timeline {
        /// Write CSV here instead of printing. Without a value, uses
        /// `storage.timeline_path`.
        #[arg(long, num_args = 0..=1)]
        export: Option<Option<PathBuf>>,
    },

    /// Rebuild the retrieval index from the database.
    Reindex,

    /// Show corpus statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Delegate a prompt to the configured agents.
    ///
    /// Each agent runs its tools (retrieval, timeline) and its reply is
    /// stored in the conversation memory of the trace.
    Delegate {
        prompt: String,

        /// Continue an existing conversation instead of starting a new one.
        #[arg(long)]
        trace_id: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show the conversation memory recorded for a delegation trace.
    Conversation {
        trace_id: String,

        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DISCOVERY_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let cfg = config::load_config(&cli.config)?;
    let engine = Engine::open(cfg).await?;
    let outcome = run_command(&engine, cli.command).await;
    engine.close().await;

    if !outcome? {
        std::process::exit(1);
    }
    Ok(())
}

/// Dispatch one subcommand. Returns `false` when the command ran but should
/// exit non-zero (a batch with failed files).
async fn run_command(engine: &Engine, command: Commands) -> anyhow::Result<bool> {
    match command {
        Commands::Init => {
            migrate::apply(engine.pool()).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            paths,
            source,
            json,
        } => {
            let files = ingest::collect_paths(&engine.config().ingestion, &paths)?;
            let report = engine.ingest_paths(&files, &source).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for id in &report.ingested {
                    println!("ingested {}", id);
                }
                for (path, err) in &report.failed {
                    println!("FAILED   {}: {}", path.display(), err);
                }
                println!(
                    "{} ingested, {} failed",
                    report.ingested.len(),
                    report.failed.len()
                );
            }
            return Ok(report.is_clean());
        }
        Commands::Search {
            query,
            filters,
            limit,
            explain,
            json,
        } => {
            let filters = search::parse_filters(&filters)?;
            search::run_search(engine, &query, &filters, limit, explain, json)?;
        }
        Commands::Get { id, json } => {
            get::run_get(engine.pool(), &id, json).await?;
        }
        Commands::Runs {
            status,
            limit,
            json,
        } => {
            runs::run_runs(engine.pool(), status.as_deref(), limit, json).await?;
        }
        Commands::DeadLetters { limit, json } => {
            runs::run_dead_letters(engine.pool(), limit, json).await?;
        }
        Commands::Neighbors { node } => {
            let neighbors = engine.neighbors(&node);
            if neighbors.is_empty() {
                println!("No neighbors.");
            }
            for n in neighbors {
                println!("{}", n);
            }
        }
        Commands::Timeline { export } => {
            let default_path = &engine.config().storage.timeline_path;
            let target = export.map(|p| p.unwrap_or_else(|| default_path.clone()));
            timeline::run_timeline(engine.pool(), target.as_deref()).await?;
        }
        Commands::Reindex => {
            let n = engine.reindex().await?;
            println!("Reindexed {} documents.", n);
        }
        Commands::Stats { json } => {
            stats::run_stats(engine, json).await?;
        }
        Commands::Delegate {
            prompt,
            trace_id,
            json,
        } => {
            agents::run_delegate(engine, &prompt, trace_id.as_deref(), json).await?;
        }
        Commands::Conversation { trace_id, json } => {
            agents::run_conversation(engine.pool(), &trace_id, json).await?;
        }
    }
    Ok(true)
}

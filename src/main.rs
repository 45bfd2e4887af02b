//! # Facilities Drafter CLI (`fdraft`)
//!
//! ## Usage
//!
//! ```bash
//! fdraft --config ./config/fdraft.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fdraft init` | Create the index database and run schema migrations |
//! | `fdraft ingest` | Chunk, embed and index new documents under the ingestion root |
//! | `fdraft stats` | Show index size and per-category counts |
//! | `fdraft search "<query>"` | Retrieve the top-k chunks for a query |
//! | `fdraft analyze drift` | Measure retrieval stability across repeated runs |
//! | `fdraft analyze overlap` | Measure semantic overlap and source diversity |
//! | `fdraft analyze compare A B` | Compare two drift reports |
//! | `fdraft draft --input sections.toml` | Compose a Facilities draft |
//! | `fdraft completions <shell>` | Print a shell completion script |
//!
//! Logs go to stderr and honour `RUST_LOG` (default `info`).

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use facilities_drafter::analysis::{self, AnalysisArgs};
use facilities_drafter::sqlite_index::SqliteIndex;
use facilities_drafter::{compose, config, ingest, search, stats};

/// Facilities Drafter: retrieval-augmented drafting of the Facilities
/// section of grant proposals.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/fdraft.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "fdraft",
    about = "Facilities Drafter: ingest past proposals, retrieve, analyze, and draft",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fdraft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index database. Idempotent.
    Init,

    /// Ingest documents from the ingestion root.
    ///
    /// Files already in the index (by dedup key) are skipped, so re-running
    /// only picks up new documents.
    Ingest {
        /// Override `[ingest].root`.
        #[arg(long)]
        root: Option<PathBuf>,

        /// Scan, extract and chunk without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show index statistics.
    Stats,

    /// Retrieve chunks for a query.
    Search {
        query: String,

        /// Number of chunks (default `[retrieval].k`).
        #[arg(long)]
        k: Option<usize>,

        /// Category tag substring; repeat for several.
        #[arg(long = "filter")]
        filter: Vec<String>,
    },

    /// Drift and overlap analysis.
    Analyze {
        #[command(subcommand)]
        action: AnalyzeAction,
    },

    /// Compose a Facilities draft from per-section notes.
    Draft {
        /// TOML file mapping section labels to notes.
        #[arg(long)]
        input: PathBuf,

        /// Write the draft here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum AnalyzeAction {
    /// Repeat each query and report id, source and content drift.
    Drift {
        #[command(flatten)]
        opts: AnalyzeOpts,

        /// Runs per query (default `[analysis].num_runs`).
        #[arg(long)]
        runs: Option<usize>,
    },

    /// Report semantic overlap and source diversity per query.
    Overlap {
        #[command(flatten)]
        opts: AnalyzeOpts,
    },

    /// Compare two drift reports.
    Compare { a: PathBuf, b: PathBuf },
}

#[derive(clap::Args)]
struct AnalyzeOpts {
    /// Query to analyze; repeat for several (default `[analysis].queries`).
    #[arg(long = "query")]
    queries: Vec<String>,

    #[arg(long)]
    k: Option<usize>,

    /// Category tag substring; repeat for several (default `[analysis].category_filter`).
    #[arg(long = "filter")]
    filter: Vec<String>,

    /// Report path (default `{output_dir}/<kind>_analysis.json`).
    #[arg(long)]
    out: Option<PathBuf>,
}

impl AnalyzeOpts {
    fn into_args(self, runs: Option<usize>) -> AnalysisArgs {
        AnalysisArgs {
            queries: self.queries,
            runs,
            k: self.k,
            filter: self.filter,
            out: self.out,
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Commands that need no config file.
    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "fdraft", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Analyze {
            action: AnalyzeAction::Compare { ref a, ref b },
        } => {
            analysis::run_compare(a, b)?;
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let index = SqliteIndex::open(&cfg).await?;
            index.close().await;
            println!("Index initialized at {}", cfg.index.db_path().display());
        }
        Commands::Ingest { root, dry_run } => {
            ingest::run_ingest(&cfg, root, dry_run).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Search { query, k, filter } => {
            search::run_search(&cfg, &query, k, filter).await?;
        }
        Commands::Analyze { action } => match action {
            AnalyzeAction::Drift { opts, runs } => {
                analysis::run_drift(&cfg, &opts.into_args(runs)).await?;
            }
            AnalyzeAction::Overlap { opts } => {
                analysis::run_overlap(&cfg, &opts.into_args(None)).await?;
            }
            AnalyzeAction::Compare { .. } => {
                // Handled above (before config loading)
                unreachable!()
            }
        },
        Commands::Draft { input, out } => {
            compose::run_draft(&cfg, &input, out).await?;
        }
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}

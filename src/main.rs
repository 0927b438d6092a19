//! # codescope CLI
//!
//! ## Usage
//!
//! ```bash
//! codescope --config ./codescope.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `codescope index <ROOT>` | Full rebuild into a new generation |
//! | `codescope update <ROOT>` | Re-index changed files only |
//! | `codescope search <ROOT> "<query>"` | Hybrid search |
//! | `codescope stats <ROOT>` | Index statistics |
//!
//! Logs go to stderr (`RUST_LOG`, default `info`); results go to stdout.
//! Ctrl-C during `index` or `update` discards the staged generation and
//! leaves the previous one in place.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use codescope::config::{self, Config};
use codescope::engine;
use codescope::index_store::{store_dir, BuildReport};
use codescope::query::QueryOptions;
use codescope::sqlite_store::store_path;
use codescope::stats::print_stats;
use codescope::workspace::WorkspaceRoot;

/// Hybrid keyword + semantic code search over one workspace.
#[derive(Parser)]
#[command(name = "codescope", version)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults are used when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "codescope.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the index for a workspace root from scratch.
    Index {
        root: PathBuf,

        /// Extra gitignore-style file applied after `.gitignore`.
        #[arg(long)]
        ignore_file: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Re-index files whose mtime or size changed; drop deleted files.
    Update {
        root: PathBuf,

        #[arg(long)]
        ignore_file: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Search the index.
    Search {
        root: PathBuf,

        query: String,

        /// Number of results.
        #[arg(short, long)]
        k: Option<usize>,

        #[arg(long)]
        vector_weight: Option<f64>,

        #[arg(long)]
        keyword_weight: Option<f64>,

        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats {
        root: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

fn load(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found; using defaults");
        Ok(Config::default())
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling");
            child.cancel();
        }
    });
    token
}

fn print_report(label: &str, report: &BuildReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("{}", label);
    println!("  generation:     {}", report.stats.generation);
    println!("  files scanned:  {}", report.files_scanned);
    println!("  files indexed:  {}", report.indexed);
    println!("  unchanged:      {}", report.files_unchanged);
    println!("  removed:        {}", report.files_removed);
    println!("  chunks:         {}", report.stats.chunk_count);
    println!(
        "  embedded:       {} ({} keyword-only)",
        report.chunks_embedded, report.chunks_keyword_only
    );
    if report.rejected_symlinks > 0 {
        println!("  rejected links: {}", report.rejected_symlinks);
    }
    if !report.skipped.is_empty() {
        println!("  skipped:        {}", report.skipped.len());
        for warning in &report.skipped {
            println!("    {}: {}", warning.path, warning.reason);
        }
    }
    println!("  took:           {} ms", report.duration_ms);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Index {
            root,
            ignore_file,
            json,
        } => {
            let cancel = cancel_on_ctrl_c();
            let report = engine::rebuild(&cfg, &root, ignore_file.as_deref(), &cancel).await?;
            print_report("index", &report, json)?;
        }
        Commands::Update {
            root,
            ignore_file,
            json,
        } => {
            let cancel = cancel_on_ctrl_c();
            let report =
                engine::incremental_update(&cfg, &root, ignore_file.as_deref(), &cancel).await?;
            print_report("update", &report, json)?;
        }
        Commands::Search {
            root,
            query,
            k,
            vector_weight,
            keyword_weight,
            json,
        } => {
            let defaults = QueryOptions::from(&cfg.retrieval);
            let options = QueryOptions {
                k: k.unwrap_or(defaults.k),
                vector_weight: vector_weight.unwrap_or(defaults.vector_weight),
                keyword_weight: keyword_weight.unwrap_or(defaults.keyword_weight),
            };
            let response = engine::query(&cfg, &root, &query, &options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }
            if response.degraded {
                println!("(degraded: keyword-only ranking)");
            }
            if response.results.is_empty() {
                println!("No results.");
            }
            for (i, result) in response.results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {}:{}-{} ({})",
                    i + 1,
                    result.combined_score,
                    result.path,
                    result.start_line,
                    result.end_line,
                    result.kind
                );
                for line in result.snippet.lines().take(6) {
                    println!("    {}", line);
                }
                println!();
            }
        }
        Commands::Stats { root, json } => {
            let stats = engine::stats(&cfg, &root).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                let workspace = WorkspaceRoot::new(&root)?;
                let file = store_path(&store_dir(&cfg, &workspace), &workspace);
                print_stats(&stats, workspace.path(), Some(&file));
            }
        }
    }

    Ok(())
}

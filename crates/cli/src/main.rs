mod report;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use context_indexer::{AnalysisService, IndexEvent, IndexerConfig};
use log::{debug, info, warn};
use report::ReportLine;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(
    name = "context-analyze",
    about = "Symbol extraction and change-aware caching for Python, JavaScript, TypeScript, JSON and YAML",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze files and print one JSON object per path
    Analyze(AnalyzeArgs),

    /// Warm the index for a tree and log index events until Ctrl-C
    Watch(WatchArgs),
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Files to analyze
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Indexer configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pretty-print each JSON object
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct WatchArgs {
    /// Directory to watch (repeatable; defaults to configured roots or cwd)
    #[arg(long = "root")]
    roots: Vec<PathBuf>,

    /// Indexer configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Re-analyze changed files right after invalidation
    #[arg(long)]
    eager: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match cli.command {
        Commands::Analyze(args) => run_analyze(args).await,
        Commands::Watch(args) => run_watch(args).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<IndexerConfig> {
    match path {
        Some(path) => IndexerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(IndexerConfig::default()),
    }
}

async fn run_analyze(args: AnalyzeArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let service =
        AnalysisService::with_builtins(config).context("Failed to initialise analysis service")?;

    let outcomes = service.analyze_many(args.paths).await;
    let total = outcomes.len();
    let mut failed = 0usize;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for outcome in outcomes {
        let line = ReportLine::from(outcome);
        if let Some(error) = &line.error {
            failed += 1;
            debug!("{}: {}", line.path.display(), error.message);
        }
        let encoded = if args.pretty {
            serde_json::to_string_pretty(&line)?
        } else {
            serde_json::to_string(&line)?
        };
        writeln!(out, "{encoded}")?;
    }
    out.flush()?;

    debug!("{:?}", service.stats());
    if failed == total {
        bail!("All {total} paths failed to analyze");
    }
    Ok(())
}

async fn run_watch(args: WatchArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if args.eager {
        config.eager_reindex = true;
    }

    let roots = if !args.roots.is_empty() {
        args.roots
    } else if !config.watch_roots.is_empty() {
        config.watch_roots.clone()
    } else {
        vec![std::env::current_dir().context("Failed to resolve current directory")?]
    };

    let service =
        AnalysisService::with_builtins(config).context("Failed to initialise analysis service")?;
    let warmed = service.warm(&roots).await.context("Failed to warm index")?;
    if !warmed.errors.is_empty() {
        warn!("{} files could not be analyzed", warmed.errors.len());
    }

    let mut events = service.subscribe();
    let handle = service
        .start_watching(&roots)
        .context("Failed to start watcher")?;
    info!(
        "Watching {} directories under {} root(s); Ctrl-C to stop",
        handle.watcher().watch_count(),
        roots.len()
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {skipped} index events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.stop().await;
    let stats = service.stats();
    info!(
        "Stopped: {} entries cached, {} parses, {} evictions",
        stats.store.entries, stats.parses, stats.store.evictions
    );
    Ok(())
}

fn log_event(event: &IndexEvent) {
    match event {
        IndexEvent::Invalidated { path } => info!("invalidated {}", path.display()),
        IndexEvent::Removed { path } => info!("removed {}", path.display()),
        IndexEvent::RemovedTree { dir, entries } => {
            info!("removed {} ({entries} entries)", dir.display());
        }
        IndexEvent::Reindexed {
            path,
            fingerprint,
            symbols,
        } => info!(
            "reindexed {} [{}] {symbols} symbols",
            path.display(),
            fingerprint.short()
        ),
        IndexEvent::Evicted { path } => debug!("evicted {}", path.display()),
        IndexEvent::WatchDegraded { path, reason } => {
            warn!("watch degraded for {}: {reason}", path.display());
        }
    }
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use entity_indexer::config::Config;
use entity_indexer::indexer::Indexer;

/// Versioned entity indexer with supersedable delayed callbacks.
#[derive(Parser)]
#[command(name = "entity-indexer", about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the JSON events file (overrides source.path).
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("entity-indexer {}", version::full());
        return Ok(());
    }

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(input) = cli.input {
        cfg.source.path = input;
    }
    if let Some(level) = cli.log_level {
        cfg.log_level = level;
    }
    cfg.validate()?;

    let filter = EnvFilter::try_new(&cfg.log_level)
        .with_context(|| format!("invalid log level: {}", cfg.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting entity-indexer",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    let mut indexer = Indexer::new(cfg)?;
    let shutdown = indexer.shutdown_token();

    let signals = tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to register SIGTERM handler");
                    if ctrl_c.await.is_ok() {
                        tracing::info!("received SIGINT, shutting down");
                    }
                    shutdown.cancel();
                    return;
                }
            };

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        shutdown.cancel();
    });

    let result = indexer.run().await;
    signals.abort();

    let highest = result?;

    tracing::info!(
        id = %highest.entity_id,
        metric = highest.metric,
        version = highest.version,
        "the highest metric entity",
    );

    Ok(())
}

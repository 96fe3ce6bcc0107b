//! macro-aggregator binary entrypoint.
//!
//! Runs one aggregation cycle and prints the snapshot as JSON, or keeps
//! running on an interval with `--every <secs>` until Ctrl-C.
//!
//! ```text
//! macro-aggregator [--config <path>] [--every <secs>] [--no-store] [--metrics]
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use macro_aggregator::ingest::scheduler::spawn_scheduler;
use macro_aggregator::metrics::Metrics;
use macro_aggregator::{Aggregator, AggregatorConfig, SnapshotStore, SqliteStore};

const ENV_LOG_JSON: &str = "AGGREGATOR_LOG_JSON";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    every: Option<Duration>,
    no_store: bool,
    metrics: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--config" => {
                let p = it.next().context("--config needs a path")?;
                args.config = Some(PathBuf::from(p));
            }
            "--every" => {
                let s = it.next().context("--every needs seconds")?;
                let secs: u64 = s.parse().with_context(|| format!("bad --every value: {s}"))?;
                if secs == 0 {
                    bail!("--every must be at least 1 second");
                }
                args.every = Some(Duration::from_secs(secs));
            }
            "--no-store" => args.no_store = true,
            "--metrics" => args.metrics = true,
            "-h" | "--help" => {
                println!(
                    "usage: macro-aggregator [--config <path>] [--every <secs>] [--no-store] [--metrics]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

/// Logs go to stderr so stdout stays clean JSON.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("macro_aggregator=info,warn"));
    let json = std::env::var(ENV_LOG_JSON).ok().is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let args = parse_args()?;
    let metrics = if args.metrics {
        Some(Metrics::init().context("installing prometheus recorder")?)
    } else {
        None
    };

    let cfg = match &args.config {
        Some(p) => AggregatorConfig::load_from(p)?,
        None => AggregatorConfig::load_default()?,
    };

    let store: Option<Arc<dyn SnapshotStore>> = if args.no_store {
        None
    } else {
        let s = SqliteStore::open(&cfg.database_path)
            .with_context(|| format!("opening store at {}", cfg.database_path.display()))?;
        Some(Arc::new(s))
    };

    let aggregator = Arc::new(Aggregator::from_config(&cfg, store)?);
    tracing::info!(
        sources = ?aggregator.source_ids(),
        deadline_ms = cfg.global_deadline_ms,
        pool = cfg.worker_pool_size,
        "aggregator ready"
    );

    match args.every {
        None => {
            let outcome = aggregator.run_cycle().await?;
            println!("{}", serde_json::to_string_pretty(&outcome.snapshot)?);
            if let Some(e) = &outcome.store_error {
                tracing::warn!(error = %e, "snapshot not persisted");
            }
        }
        Some(every) => {
            let handle = spawn_scheduler(Arc::clone(&aggregator), every);
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("ctrl-c received, shutting down"),
                res = handle => {
                    if let Err(e) = res {
                        tracing::error!(error = ?e, "scheduler task ended abnormally");
                    }
                }
            }
        }
    }

    if let Some(m) = metrics {
        print!("{}", m.render());
    }
    Ok(())
}

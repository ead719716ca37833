//! noticewatch — Binary Entrypoint
//! Runs exactly one monitoring cycle and exits; scheduling belongs to cron
//! (or whatever invokes this).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use noticewatch::classify::Taxonomy;
use noticewatch::config::AppConfig;
use noticewatch::cycle::{prepare_sources, run_cycle, CycleContext};
use noticewatch::dedup::JsonSeenStore;
use noticewatch::notify::{build_dispatcher, ConsoleDispatcher, Dispatcher};

struct CliArgs {
    config: Option<PathBuf>,
    dry_run: bool,
}

fn parse_args() -> Result<CliArgs> {
    let mut args = CliArgs {
        config: None,
        dry_run: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--dry-run" => args.dry_run = true,
            "--config" => {
                let path = it
                    .next()
                    .ok_or_else(|| anyhow!("--config needs a path argument"))?;
                args.config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                println!("usage: noticewatch [--config <path>] [--dry-run]");
                std::process::exit(0);
            }
            other => return Err(anyhow!("unknown argument `{other}`")),
        }
    }
    Ok(args)
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("noticewatch=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env in local/dev; no-op where the environment is provisioned.
    let _ = dotenvy::dotenv();
    init_tracing();

    let args = parse_args()?;
    let config_path = AppConfig::resolve_path(args.config.as_deref());
    let cfg = AppConfig::from_path(&config_path)?;

    let taxonomy = Taxonomy::compile(
        &cfg.categories,
        cfg.pipeline.default_confidence_threshold,
    )
    .context("compiling category taxonomy")?;
    if taxonomy.is_empty() {
        tracing::warn!("no categories configured; every record will be unmatched");
    }

    // Fail-closed: if the store cannot be opened, nothing gets dispatched.
    let store = Arc::new(JsonSeenStore::open(&cfg.store.path)?);

    // A dry run never delivers, so it does not need real credentials.
    let dispatcher: Arc<dyn Dispatcher> = if args.dry_run {
        Arc::new(ConsoleDispatcher)
    } else {
        Arc::from(build_dispatcher(&cfg.dispatch)?)
    };

    let sources = prepare_sources(&cfg)?;
    tracing::info!(
        sources = sources.len(),
        seen = store.len(),
        dry_run = args.dry_run,
        config = %config_path.display(),
        "starting cycle"
    );

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received, finishing in-flight work");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let ctx = CycleContext {
        sources,
        taxonomy: Arc::new(taxonomy),
        store,
        dispatcher,
        unmatched_policy: cfg.pipeline.unmatched_policy,
        max_in_flight: cfg.pipeline.max_in_flight,
        dry_run: args.dry_run,
        cancel,
    };
    let summary = run_cycle(&ctx).await;

    tracing::info!(
        delivered = summary.delivered_total(),
        sources_failed = summary.sources_failed,
        duration_ms = summary.duration_ms,
        cancelled = summary.cancelled,
        "cycle finished"
    );
    // The summary is the machine-readable surface for whatever invoked us.
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

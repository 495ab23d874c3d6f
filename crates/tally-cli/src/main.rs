#![doc = include_str!("../README.md")]

mod app;

use anyhow::Context;
use app::config::{AppConfig, CliArgs};
use app::progress::LogProgress;
use app::report::Report;
use app::shutdown::{FORCED_EXIT_CODE, cancel_on_signals, shutdown_signal};
use app::telemetry::init_telemetry;
use clap::Parser;
use std::{io::Write, sync::Arc};
use tally::{CancellationToken, CountEngine, RunStatus};
use tally_dataverse::DataverseConnector;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = AppConfig::try_from(args)?;

    init_telemetry(config.log_format)?;
    log_startup_info(&config);

    let connector = Arc::new(DataverseConnector::new(config.dataverse.clone())?);

    if config.skip_version_check {
        tracing::warn!("Skipping organization version check");
    } else {
        connector
            .check_version()
            .await
            .context("organization version check failed")?;
    }

    let targets = app::entities::load(&config.source, &connector).await?;
    let engine = CountEngine::with_shared_factory(Arc::clone(&connector), config.engine.clone())?;

    let cancel = CancellationToken::new();
    let shutdown = tokio::spawn(watch_signals(cancel.clone()));

    let mut report = Report::new(&targets);
    let summary = engine
        .run(&targets, &mut report, &mut LogProgress, cancel)
        .await?;
    shutdown.abort();

    let rendered = report.render(config.format, &config.ordering, &summary);
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(rendered.as_bytes())
        .and_then(|()| stdout.flush())
        .context("writing report to stdout")?;

    if summary.status == RunStatus::Cancelled {
        tracing::info!("Partial results printed for the batches that finished");
    }
    Ok(())
}

fn log_startup_info(config: &AppConfig) {
    tracing::info!(
        org = %config.dataverse.org_url,
        api_version = %config.dataverse.api_version,
        batch_size = config.engine.batch_size,
        max_parallel = config.engine.max_parallel,
        batch_timeout = ?config.engine.batch_timeout,
        "Starting tally"
    );
}

/// The first signal cancels the run; a second one exits immediately.
async fn watch_signals(cancel: CancellationToken) {
    cancel_on_signals(shutdown_signal, cancel).await;
    std::process::exit(FORCED_EXIT_CODE);
}

mod assemble;
mod db;
mod decode;
mod extract;
mod normalize;
mod rpc;
mod runner;
mod sink;
mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use decode::{DecodeRegistry, DecoderPool};
use rpc::CometClient;
use runner::{run_follow, run_range, HeightFetcher, RangeRunnerConfig};
use types::config::{IndexerConfig, ToHeight};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/config.json".to_string());
    let config = IndexerConfig::load(Path::new(&config_path))?;

    let client = Arc::new(CometClient::new(&config.source)?);

    let registry = match &config.source.proto_descriptor_path {
        Some(path) => DecodeRegistry::with_descriptor_set(Path::new(path))?,
        None => DecodeRegistry::new(),
    };
    let decoder = Arc::new(DecoderPool::new(
        Arc::new(registry),
        config.concurrency.decode_pool_size,
        config.concurrency.case_mode,
    ));

    let status = client.status().await?;
    tracing::info!(
        "Chain reachable: heights {}..={}",
        status.earliest_block_height,
        status.latest_block_height
    );

    let (mut sink, resume_height) = sink::build(&config.sink, config.range.resume).await?;
    if let Some(resumed) = resume_height {
        tracing::info!("Resuming from persisted progress at height {}", resumed);
    }

    let from = resume_height
        .map(|h| h + 1)
        .or(config.range.from)
        .unwrap_or_else(|| {
            status
                .earliest_block_height
                .max(config.range.first_block)
        });
    let to = match config.range.to {
        Some(ToHeight::Height(h)) => h,
        Some(ToHeight::Latest) | None => status.latest_block_height,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    let fetcher = Arc::new(HeightFetcher::new(
        Arc::clone(&client),
        Arc::clone(&decoder),
        Duration::from_millis(config.concurrency.block_timeout_ms),
    ));
    let runner_config = RangeRunnerConfig {
        concurrency: config.concurrency.concurrency,
        max_block_retries: config.concurrency.max_block_retries,
        progress_every_blocks: config.concurrency.progress_every_blocks,
        progress_interval_sec: config.concurrency.progress_interval_sec,
        report_speed: true,
    };

    if from <= to {
        tracing::info!("Backfilling heights {}..={}", from, to);
        let outcome = run_range(
            Arc::clone(&fetcher) as Arc<dyn runner::BlockFetcher>,
            sink.as_mut(),
            from,
            to,
            &runner_config,
            &shutdown_rx,
        )
        .await?;
        sink.flush().await.map_err(anyhow::Error::from)?;
        tracing::info!(
            "Backfill complete: {} heights processed, {} skipped",
            outcome.processed,
            outcome.skipped.len()
        );
    } else {
        tracing::info!("Nothing to backfill (from {} > to {})", from, to);
    }

    if config.range.follow && !*shutdown_rx.borrow() {
        let next = from.max(to + 1);
        let mut follow_shutdown = shutdown_rx.clone();
        run_follow(
            Arc::clone(&client),
            Arc::clone(&fetcher) as Arc<dyn runner::BlockFetcher>,
            sink.as_mut(),
            next,
            &runner_config,
            config.range.follow_interval_ms,
            &mut follow_shutdown,
        )
        .await?;
    }

    decoder.close().await;
    sink.close().await.map_err(anyhow::Error::from)?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                let _ = shutdown_tx.send(true);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT, shutting down"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received interrupt, shutting down");
    }
    let _ = shutdown_tx.send(true);
}

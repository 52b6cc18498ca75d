use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

use super::fetch::BlockFetcher;
use super::range::{run_range, RangeRunnerConfig, RunnerError};
use crate::rpc::CometClient;
use crate::sink::Sink;

/// Follow-mode caps the window; a tip catch-up is a handful of heights.
const FOLLOW_MAX_CONCURRENCY: usize = 16;

/// Tail the chain: poll `/status`, ingest `[next, latest]` whenever the tip
/// has advanced, sleep with jitter when caught up. Runs until shutdown.
pub async fn run_follow(
    client: Arc<CometClient>,
    fetcher: Arc<dyn BlockFetcher>,
    sink: &mut dyn Sink,
    start: u64,
    base_config: &RangeRunnerConfig,
    poll_interval_ms: u64,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), RunnerError> {
    let config = RangeRunnerConfig {
        concurrency: base_config.concurrency.min(FOLLOW_MAX_CONCURRENCY),
        report_speed: false,
        ..base_config.clone()
    };

    let mut next = start;
    tracing::info!("Following chain tip from height {}", next);

    while !*shutdown.borrow() {
        let latest = match client.status().await {
            Ok(status) => status.latest_block_height,
            Err(error) => {
                tracing::warn!("Status poll failed: {}", error);
                sleep_with_jitter(poll_interval_ms, shutdown).await;
                continue;
            }
        };

        if next <= latest {
            let outcome =
                run_range(Arc::clone(&fetcher), sink, next, latest, &config, shutdown).await?;
            if let Err(error) = sink.flush().await {
                tracing::warn!("Flush after tip catch-up failed: {}", error);
            }
            tracing::debug!(
                "Caught up to {} ({} heights, {} skipped)",
                latest,
                outcome.processed,
                outcome.skipped.len()
            );
            next = latest + 1;
        } else {
            sleep_with_jitter(poll_interval_ms, shutdown).await;
        }
    }

    Ok(())
}

/// Sleep `poll_ms × uniform(0.8, 1.2)`, waking early on shutdown.
async fn sleep_with_jitter(poll_ms: u64, shutdown: &mut watch::Receiver<bool>) {
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    let delay = Duration::from_millis((poll_ms as f64 * factor) as u64);
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.changed() => {}
    }
}

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::fetch::{BlockError, BlockFetcher};
use crate::sink::{Sink, SinkError};
use crate::types::record::BlockRecord;

/// Consecutive sink failures tolerated before the run aborts. A failed
/// batch flush keeps its buffers, so later writes retry the same rows.
const MAX_CONSECUTIVE_SINK_FAILURES: u32 = 3;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Sink failed {failures} consecutive times, giving up: {source}")]
    SinkExhausted { failures: u32, source: SinkError },
}

#[derive(Debug, Clone)]
pub struct RangeRunnerConfig {
    pub concurrency: usize,
    pub max_block_retries: u32,
    pub progress_every_blocks: u64,
    pub progress_interval_sec: u64,
    pub report_speed: bool,
}

#[derive(Debug, Default)]
pub struct RangeOutcome {
    /// Heights flushed past (committed records plus skips).
    pub processed: u64,
    /// Heights abandoned after exhausting the retry budget.
    pub skipped: Vec<u64>,
}

/// A completed height waiting for ordered flush: either the assembled
/// record, or a skip marker for an abandoned height.
enum Ready {
    Record(Box<BlockRecord>),
    Skip,
}

/// Drive ordered, windowed ingestion of `[from, to]`: up to `concurrency`
/// heights in flight, completions buffered out of order, flushed to the
/// sink in strictly ascending height order. Failed heights re-enter
/// through the retry queue and become skip markers once the per-height
/// budget is spent.
pub async fn run_range(
    fetcher: Arc<dyn BlockFetcher>,
    sink: &mut dyn Sink,
    from: u64,
    to: u64,
    config: &RangeRunnerConfig,
    shutdown: &watch::Receiver<bool>,
) -> Result<RangeOutcome, RunnerError> {
    if to < from {
        return Ok(RangeOutcome::default());
    }

    let mut next_height = from;
    let mut next_to_flush = from;
    let mut ready: BTreeMap<u64, Ready> = BTreeMap::new();
    let mut attempts: HashMap<u64, u32> = HashMap::new();
    let mut retry_queue: VecDeque<u64> = VecDeque::new();
    let mut tasks: JoinSet<(u64, Result<BlockRecord, BlockError>)> = JoinSet::new();
    let mut in_flight: HashMap<tokio::task::Id, u64> = HashMap::new();

    let mut outcome = RangeOutcome::default();
    let mut sink_failures = 0u32;

    let started = Instant::now();
    let report_interval = Duration::from_secs(config.progress_interval_sec);
    let mut last_report = Instant::now();
    let mut reported_processed = 0u64;

    loop {
        while tasks.len() < config.concurrency && !*shutdown.borrow() {
            let height = match retry_queue.pop_front() {
                Some(height) => height,
                None if next_height <= to => {
                    let height = next_height;
                    next_height += 1;
                    height
                }
                None => break,
            };
            let fetcher = Arc::clone(&fetcher);
            let handle = tasks.spawn(async move { (height, fetcher.fetch(height).await) });
            in_flight.insert(handle.id(), height);
        }

        if tasks.is_empty() {
            break;
        }

        let Some(joined) = tasks.join_next_with_id().await else {
            break;
        };

        let (height, result) = match joined {
            Ok((id, (height, result))) => {
                in_flight.remove(&id);
                (height, result)
            }
            Err(join_err) => {
                let height = in_flight.remove(&join_err.id());
                let Some(height) = height else {
                    tracing::error!("Lost track of a fetch task: {}", join_err);
                    continue;
                };
                (
                    height,
                    Err(BlockError::Timeout {
                        step: "task",
                        timeout: Duration::ZERO,
                    }),
                )
            }
        };

        match result {
            Ok(record) => {
                ready.insert(height, Ready::Record(Box::new(record)));
                attempts.remove(&height);
            }
            Err(error) => {
                let attempt = attempts.entry(height).or_insert(0);
                *attempt += 1;
                if *attempt <= config.max_block_retries {
                    tracing::warn!(
                        "Height {} failed (attempt {}/{}), requeueing: {}",
                        height,
                        attempt,
                        config.max_block_retries + 1,
                        error
                    );
                    retry_queue.push_back(height);
                } else {
                    tracing::error!(
                        "Giving up on height {} after {} attempts: {}",
                        height,
                        attempt,
                        error
                    );
                    outcome.skipped.push(height);
                    ready.insert(height, Ready::Skip);
                }
            }
        }

        while let Some(entry) = ready.remove(&next_to_flush) {
            match entry {
                Ready::Record(record) => match sink.write(*record).await {
                    Ok(()) => sink_failures = 0,
                    Err(error) => {
                        sink_failures += 1;
                        if sink_failures > MAX_CONSECUTIVE_SINK_FAILURES {
                            return Err(RunnerError::SinkExhausted {
                                failures: sink_failures,
                                source: error,
                            });
                        }
                        tracing::warn!(
                            "Sink write failed ({}/{} consecutive): {}",
                            sink_failures,
                            MAX_CONSECUTIVE_SINK_FAILURES,
                            error
                        );
                    }
                },
                Ready::Skip => {}
            }
            next_to_flush += 1;
            outcome.processed += 1;
        }

        if outcome.processed.saturating_sub(reported_processed) >= config.progress_every_blocks
            || last_report.elapsed() >= report_interval
        {
            report_progress(config, from, to, next_to_flush, &outcome, &started);
            last_report = Instant::now();
            reported_processed = outcome.processed;
        }
    }

    if config.report_speed {
        let elapsed = started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            outcome.processed as f64 / elapsed
        } else {
            0.0
        };
        tracing::info!(
            "Range {}..={} done: {} heights processed, {} skipped, {:.1} blocks/s",
            from,
            to,
            outcome.processed,
            outcome.skipped.len(),
            rate
        );
    }

    Ok(outcome)
}

fn report_progress(
    config: &RangeRunnerConfig,
    from: u64,
    to: u64,
    next_to_flush: u64,
    outcome: &RangeOutcome,
    started: &Instant,
) {
    let total = to - from + 1;
    if !config.report_speed {
        tracing::info!(
            "Progress: {}/{} heights (next {})",
            outcome.processed,
            total,
            next_to_flush
        );
        return;
    }
    let elapsed = started.elapsed().as_secs_f64();
    let rate = if elapsed > 0.0 {
        outcome.processed as f64 / elapsed
    } else {
        0.0
    };
    let remaining = total.saturating_sub(outcome.processed);
    if rate > 0.0 {
        tracing::info!(
            "Progress: {}/{} heights (next {}), {:.1} blocks/s, ETA {:.0}s",
            outcome.processed,
            total,
            next_to_flush,
            rate,
            remaining as f64 / rate
        );
    } else {
        tracing::info!(
            "Progress: {}/{} heights (next {})",
            outcome.processed,
            total,
            next_to_flush
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::record::{BlockMeta, BlockRecord};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    fn record(height: u64) -> BlockRecord {
        BlockRecord {
            meta: BlockMeta {
                chain_id: "testchain-1".to_string(),
                height,
                time: Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap(),
            },
            block_hash: String::new(),
            proposer_address: String::new(),
            last_commit_hash: None,
            data_hash: None,
            app_hash: None,
            evidence_count: 0,
            size_bytes: None,
            block: serde_json::Value::Null,
            block_results: serde_json::Value::Null,
            txs: vec![],
        }
    }

    /// Completes later heights faster, fails scripted heights a scripted
    /// number of times.
    struct ScriptedFetcher {
        to: u64,
        failures: Mutex<HashMap<u64, u32>>,
        permanent_failures: Vec<u64>,
    }

    #[async_trait]
    impl BlockFetcher for ScriptedFetcher {
        async fn fetch(&self, height: u64) -> Result<BlockRecord, BlockError> {
            // Invert completion order so ordered flush actually reorders.
            let delay = self.to.saturating_sub(height);
            tokio::time::sleep(Duration::from_millis(delay * 3)).await;

            if self.permanent_failures.contains(&height) {
                return Err(BlockError::Timeout {
                    step: "block",
                    timeout: Duration::from_millis(1),
                });
            }
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&height) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(BlockError::Timeout {
                        step: "block",
                        timeout: Duration::from_millis(1),
                    });
                }
            }
            Ok(record(height))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        heights: Vec<u64>,
        flushes: u32,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn write(&mut self, record: BlockRecord) -> Result<(), SinkError> {
            self.heights.push(record.meta.height);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), SinkError> {
            self.flushes += 1;
            Ok(())
        }

        async fn close(&mut self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn test_config(concurrency: usize) -> RangeRunnerConfig {
        RangeRunnerConfig {
            concurrency,
            max_block_retries: 2,
            progress_every_blocks: 1000,
            progress_interval_sec: 3600,
            report_speed: false,
        }
    }

    fn no_shutdown() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_sink_sees_ascending_heights() {
        let fetcher = Arc::new(ScriptedFetcher {
            to: 110,
            failures: Mutex::new(HashMap::new()),
            permanent_failures: vec![],
        });
        let mut sink = RecordingSink::default();
        let outcome = run_range(fetcher, &mut sink, 100, 110, &test_config(8), &no_shutdown())
            .await
            .unwrap();

        assert_eq!(outcome.processed, 11);
        assert!(outcome.skipped.is_empty());
        assert_eq!(sink.heights, (100..=110).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_retry_then_succeed() {
        let fetcher = Arc::new(ScriptedFetcher {
            to: 202,
            failures: Mutex::new(HashMap::from([(200, 2)])),
            permanent_failures: vec![],
        });
        let mut sink = RecordingSink::default();
        let outcome = run_range(fetcher, &mut sink, 200, 202, &test_config(4), &no_shutdown())
            .await
            .unwrap();

        assert_eq!(outcome.processed, 3);
        assert!(outcome.skipped.is_empty());
        assert_eq!(sink.heights, vec![200, 201, 202]);
    }

    #[tokio::test]
    async fn test_give_up_and_skip_preserves_order() {
        let fetcher = Arc::new(ScriptedFetcher {
            to: 302,
            failures: Mutex::new(HashMap::new()),
            permanent_failures: vec![300],
        });
        let mut sink = RecordingSink::default();
        let outcome = run_range(fetcher, &mut sink, 299, 302, &test_config(4), &no_shutdown())
            .await
            .unwrap();

        assert_eq!(outcome.processed, 4);
        assert_eq!(outcome.skipped, vec![300]);
        assert_eq!(sink.heights, vec![299, 301, 302]);
    }

    #[tokio::test]
    async fn test_empty_range_is_noop() {
        let fetcher = Arc::new(ScriptedFetcher {
            to: 0,
            failures: Mutex::new(HashMap::new()),
            permanent_failures: vec![],
        });
        let mut sink = RecordingSink::default();
        let outcome = run_range(fetcher, &mut sink, 10, 9, &test_config(4), &no_shutdown())
            .await
            .unwrap();
        assert_eq!(outcome.processed, 0);
        assert!(sink.heights.is_empty());
    }

    #[tokio::test]
    async fn test_window_never_exceeds_concurrency() {
        struct CountingFetcher {
            current: std::sync::atomic::AtomicUsize,
            peak: std::sync::atomic::AtomicUsize,
        }

        #[async_trait]
        impl BlockFetcher for CountingFetcher {
            async fn fetch(&self, height: u64) -> Result<BlockRecord, BlockError> {
                use std::sync::atomic::Ordering;
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(record(height))
            }
        }

        let fetcher = Arc::new(CountingFetcher {
            current: std::sync::atomic::AtomicUsize::new(0),
            peak: std::sync::atomic::AtomicUsize::new(0),
        });
        let mut sink = RecordingSink::default();
        run_range(
            Arc::clone(&fetcher) as Arc<dyn BlockFetcher>,
            &mut sink,
            1,
            40,
            &test_config(4),
            &no_shutdown(),
        )
        .await
        .unwrap();

        assert!(fetcher.peak.load(std::sync::atomic::Ordering::SeqCst) <= 4);
        assert_eq!(sink.heights.len(), 40);
    }

    #[tokio::test]
    async fn test_shutdown_stops_spawning() {
        let fetcher = Arc::new(ScriptedFetcher {
            to: 1000,
            failures: Mutex::new(HashMap::new()),
            permanent_failures: vec![],
        });
        let (_tx, rx) = watch::channel(true);
        let mut sink = RecordingSink::default();
        let outcome = run_range(fetcher, &mut sink, 1, 1000, &test_config(4), &rx)
            .await
            .unwrap();
        assert_eq!(outcome.processed, 0);
        assert!(sink.heights.is_empty());
    }
}

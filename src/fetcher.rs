//! Adaptive `eth_getLogs` fetcher.
//!
//! Providers cap the block range of a log query at limits they rarely
//! document. The fetcher walks a range in windows, halves the window when
//! the provider rejects it as too large, retries transient failures with
//! linear backoff plus jitter, and skips a window rather than stalling when
//! neither helps. Every window is either fetched or reported as skipped, so
//! the walk always terminates.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::approval::BlockRange;
use crate::error::{classify, ErrorClass, RpcError, ScanError};
use crate::metrics;
use crate::progress::{percent, ProgressSink};
use crate::rpc::{EvmClient, Log, LogFilter};

/// Tuning for the adaptive fetch.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Window size used when no hint is available.
    pub initial_window: u64,
    /// Floor for window shrinking; a rejected window of this size is skipped.
    pub min_window: u64,
    /// Retries per window for errors other than range-too-large.
    pub max_retries: u32,
    /// Backoff before retry `n` is `backoff_base * n` plus jitter.
    pub backoff_base: Duration,
    /// Upper bound of the random jitter added to each backoff.
    pub backoff_jitter: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            initial_window: 5000,
            min_window: 256,
            max_retries: 3,
            backoff_base: Duration::from_millis(250),
            backoff_jitter: Duration::from_millis(150),
        }
    }
}

impl FetchConfig {
    /// Smallest window ever requested; a zero `min_window` still means one block.
    fn floor(&self) -> u64 {
        self.min_window.max(1)
    }

    fn starting_window(&self, hint: u64) -> u64 {
        let hint = if hint == 0 { self.initial_window } else { hint };
        hint.max(self.floor())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let jitter_ms = self.backoff_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        };
        self.backoff_base * attempt + jitter
    }
}

/// Why a window was given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Still rejected as too large at the minimum window size.
    RangeTooLarge,
    /// Retries exhausted on other errors.
    RetriesExhausted,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RangeTooLarge => "range_too_large",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }
}

/// A window counted as covered without its logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRange {
    pub range: BlockRange,
    pub reason: SkipReason,
}

/// Result of an adaptive fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub logs: Vec<Log>,
    /// Window size in effect at the end; reuse as the next hint.
    pub window_hint: u64,
    pub skipped: Vec<SkippedRange>,
}

/// Fetch every log matching `filter` in `range`.
///
/// `window_hint` of zero means "no hint". Returns [`ScanError::Aborted`] if
/// `cancel` fires; cancellation is checked before each window.
pub async fn fetch_logs_adaptive<C: EvmClient + ?Sized>(
    client: &C,
    filter: &LogFilter,
    range: BlockRange,
    window_hint: u64,
    cfg: &FetchConfig,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<FetchOutcome, ScanError> {
    let floor = cfg.floor();
    let mut window = cfg.starting_window(window_hint);
    let mut outcome = FetchOutcome {
        window_hint: window,
        ..Default::default()
    };

    let total = range.len();
    let mut done: u64 = 0;
    let mut start = range.from;

    while total > 0 && start <= range.to {
        if cancel.is_cancelled() {
            return Err(ScanError::Aborted);
        }

        let mut end = window_end(start, window, range.to);
        let mut attempt: u32 = 0;

        let skipped = loop {
            match client.get_logs(filter, start, end).await {
                Ok(chunk) => {
                    outcome.logs.extend(chunk);
                    break None;
                }
                Err(e) => match classify(&e) {
                    ErrorClass::RangeTooLarge if window <= floor => {
                        break Some(SkipReason::RangeTooLarge);
                    }
                    ErrorClass::RangeTooLarge => {
                        window = (window / 2).max(floor);
                        end = window_end(start, window, range.to);
                        metrics::record_window_shrink(window);
                        tracing::debug!(start, window, "range too large, shrinking window");
                    }
                    class if attempt < cfg.max_retries => {
                        attempt += 1;
                        let delay = retry_delay(cfg, attempt, class);
                        tracing::debug!(
                            start,
                            end,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "getLogs failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    _ => {
                        log_exhausted(start, end, &e);
                        break Some(SkipReason::RetriesExhausted);
                    }
                },
            }
        };

        let covered = BlockRange::new(start, end);
        done += covered.len();
        let pct = percent(done, total);
        match skipped {
            None => progress.on_progress(pct, &format!("Blocks {covered}")),
            Some(reason) => {
                let verb = match reason {
                    SkipReason::RangeTooLarge => "Skipped",
                    SkipReason::RetriesExhausted => "Failed",
                };
                progress.on_progress(pct, &format!("{verb} {covered}"));
                metrics::record_window_skipped(reason.as_str());
                outcome.skipped.push(SkippedRange {
                    range: covered,
                    reason,
                });
            }
        }

        start = end + 1;
    }

    outcome.window_hint = window;
    Ok(outcome)
}

fn window_end(start: u64, window: u64, to: u64) -> u64 {
    start.saturating_add(window - 1).min(to)
}

fn retry_delay(cfg: &FetchConfig, attempt: u32, class: ErrorClass) -> Duration {
    let delay = cfg.backoff(attempt);
    if class == ErrorClass::RateLimited {
        delay * 2
    } else {
        delay
    }
}

fn log_exhausted(start: u64, end: u64, e: &RpcError) {
    tracing::warn!(start, end, error = %e, "getLogs retries exhausted, skipping window");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use alloy_primitives::{Address, Bytes, B256};
    use std::sync::Mutex;

    use crate::rpc::TxReceipt;

    /// Serves `eth_getLogs` according to a script; everything else is unused.
    struct ScriptedLogs {
        max_range: Option<u64>,
        failures_before_success: Mutex<u32>,
        always_fail: bool,
        calls: Mutex<Vec<(u64, u64)>>,
    }

    impl ScriptedLogs {
        fn new() -> Self {
            Self {
                max_range: None,
                failures_before_success: Mutex::new(0),
                always_fail: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EvmClient for ScriptedLogs {
        async fn chain_id(&self) -> Result<u64, RpcError> {
            Ok(1)
        }
        async fn block_number(&self) -> Result<u64, RpcError> {
            Ok(0)
        }
        async fn block_timestamp(&self, _n: u64) -> Result<Option<u64>, RpcError> {
            Ok(None)
        }
        async fn get_logs(
            &self,
            _filter: &LogFilter,
            from: u64,
            to: u64,
        ) -> Result<Vec<Log>, RpcError> {
            self.calls.lock().unwrap().push((from, to));
            if self.always_fail {
                return Err(RpcError::Transport("connection reset".into()));
            }
            if let Some(max) = self.max_range {
                if to - from + 1 > max {
                    return Err(RpcError::Rpc {
                        code: -32062,
                        message: "block range is too large".into(),
                        data: None,
                    });
                }
            }
            let mut remaining = self.failures_before_success.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RpcError::Http { status: 503 });
            }
            Ok(vec![Log {
                address: Address::ZERO,
                topics: vec![],
                data: Bytes::new(),
                block_number: Some(from),
            }])
        }
        async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes, RpcError> {
            unreachable!()
        }
        async fn send_transaction(
            &self,
            _from: Address,
            _to: Address,
            _data: Bytes,
        ) -> Result<B256, RpcError> {
            unreachable!()
        }
        async fn wait_for_receipt(&self, _tx: B256) -> Result<TxReceipt, RpcError> {
            unreachable!()
        }
    }

    fn fast_config() -> FetchConfig {
        FetchConfig {
            backoff_base: Duration::ZERO,
            backoff_jitter: Duration::ZERO,
            ..FetchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_walks_range_in_windows() {
        let client = ScriptedLogs::new();
        let out = fetch_logs_adaptive(
            &client,
            &LogFilter::default(),
            BlockRange::new(1, 12_000),
            0,
            &fast_config(),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let calls = client.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(1, 5000), (5001, 10_000), (10_001, 12_000)]);
        assert_eq!(out.logs.len(), 3);
        assert_eq!(out.window_hint, 5000);
        assert!(out.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_shrinks_to_provider_limit_and_keeps_hint() {
        let mut client = ScriptedLogs::new();
        client.max_range = Some(1000);
        let out = fetch_logs_adaptive(
            &client,
            &LogFilter::default(),
            BlockRange::new(100, 2099),
            0,
            &fast_config(),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        // 5000 -> 2500 -> 1250 -> 625, then 625-block windows succeed.
        assert_eq!(out.window_hint, 625);
        assert!(out.skipped.is_empty());
        let calls = client.calls.lock().unwrap().clone();
        assert_eq!(calls[0], (100, 2099));
        assert_eq!(calls[3], (100, 724));
        assert_eq!(calls.last().copied(), Some((1975, 2099)));
    }

    #[tokio::test]
    async fn test_always_too_large_terminates_by_skipping() {
        let mut client = ScriptedLogs::new();
        client.max_range = Some(0);
        let seen = Mutex::new(Vec::new());
        let sink = |pct: u8, label: &str| seen.lock().unwrap().push((pct, label.to_string()));

        let out = fetch_logs_adaptive(
            &client,
            &LogFilter::default(),
            BlockRange::new(1, 10_000),
            0,
            &fast_config(),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(out.window_hint, 256);
        assert!(out.logs.is_empty());
        let covered: u64 = out.skipped.iter().map(|s| s.range.len()).sum();
        assert_eq!(covered, 10_000);
        assert!(out
            .skipped
            .iter()
            .all(|s| s.reason == SkipReason::RangeTooLarge));
        // 5 shrinks, then one call per 256-block window.
        let calls = client.calls.lock().unwrap().len();
        assert_eq!(calls, 5 + 10_000usize.div_ceil(256));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.last().unwrap().0, 100);
        assert!(seen.last().unwrap().1.starts_with("Skipped"));
    }

    #[tokio::test]
    async fn test_zero_min_window_still_terminates() {
        let mut client = ScriptedLogs::new();
        client.max_range = Some(0);
        let cfg = FetchConfig {
            min_window: 0,
            ..fast_config()
        };

        let out = tokio::time::timeout(
            Duration::from_secs(5),
            fetch_logs_adaptive(
                &client,
                &LogFilter::default(),
                BlockRange::new(1, 10),
                0,
                &cfg,
                &NoProgress,
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("walk did not finish")
        .unwrap();

        assert_eq!(out.window_hint, 1);
        assert_eq!(out.skipped.len(), 10);
        assert!(out.skipped.iter().all(|s| s.range.len() == 1));
    }

    #[tokio::test]
    async fn test_transient_errors_retry_then_succeed() {
        let client = ScriptedLogs::new();
        *client.failures_before_success.lock().unwrap() = 2;
        let out = fetch_logs_adaptive(
            &client,
            &LogFilter::default(),
            BlockRange::new(1, 100),
            0,
            &fast_config(),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(out.logs.len(), 1);
        assert!(out.skipped.is_empty());
        assert_eq!(client.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_skip_window_and_continue() {
        let mut client = ScriptedLogs::new();
        client.always_fail = true;
        let out = fetch_logs_adaptive(
            &client,
            &LogFilter::default(),
            BlockRange::new(1, 6000),
            0,
            &fast_config(),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(out.skipped.len(), 2);
        assert!(out
            .skipped
            .iter()
            .all(|s| s.reason == SkipReason::RetriesExhausted));
        // 1 attempt + 3 retries per window.
        assert_eq!(client.calls.lock().unwrap().len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_uses_configured_delay() {
        let client = ScriptedLogs::new();
        *client.failures_before_success.lock().unwrap() = 1;
        let cfg = FetchConfig {
            backoff_jitter: Duration::ZERO,
            ..FetchConfig::default()
        };
        let started = tokio::time::Instant::now();
        fetch_logs_adaptive(
            &client,
            &LogFilter::default(),
            BlockRange::new(1, 10),
            0,
            &cfg,
            &NoProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let client = ScriptedLogs::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetch_logs_adaptive(
            &client,
            &LogFilter::default(),
            BlockRange::new(1, 100),
            0,
            &fast_config(),
            &NoProgress,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(err.is_aborted());
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hint_respects_floor() {
        let client = ScriptedLogs::new();
        let out = fetch_logs_adaptive(
            &client,
            &LogFilter::default(),
            BlockRange::new(1, 300),
            10,
            &fast_config(),
            &NoProgress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(out.window_hint, 256);
        assert_eq!(client.calls.lock().unwrap().len(), 2);
    }
}

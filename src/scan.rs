//! Scan orchestration.
//!
//! A scan plans a block range from the cached bounds, fetches `Approval` and
//! `ApprovalForAll` logs for the owner, confirms the candidates against live
//! state and merges the result into the persisted cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use alloy_primitives::Address;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::abi::{address_topic, approval_for_all_topic, approval_topic};
use crate::approval::{BlockRange, ConfirmedApprovals};
use crate::blocktime::{blocks_for_days, estimate_block_time};
use crate::cache::{now_ms, CacheStore, ScanCache, ScanResult};
use crate::confirm::confirm_candidates;
use crate::error::ScanError;
use crate::extract;
use crate::fetcher::{fetch_logs_adaptive, FetchConfig, SkippedRange};
use crate::metadata::MetadataCache;
use crate::metrics;
use crate::progress::{ProgressSink, Scaled};
use crate::rpc::{EvmClient, LogFilter};
use crate::store::KvStore;

/// Scan tuning.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Days of history covered by one scan.
    pub days_per_scan: u32,
    pub fetch: FetchConfig,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            days_per_scan: 7,
            fetch: FetchConfig::default(),
        }
    }
}

/// Which window a scan covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    /// The most recent `days_per_scan`, starting after the cached upper bound.
    Latest,
    /// The `days_per_scan` immediately before the cached lower bound.
    Previous,
}

/// Block range for the next scan.
///
/// `Previous` without a cached lower bound behaves like `Latest`.
pub fn plan_range(
    direction: ScanDirection,
    head: u64,
    blocks: u64,
    cached: Option<&ScanCache>,
) -> BlockRange {
    let span = blocks.max(1) - 1;
    let previous_end = match (direction, cached) {
        (ScanDirection::Previous, Some(c)) if c.earliest_scanned_block > 0 => {
            Some(c.earliest_scanned_block.saturating_sub(1).max(1))
        }
        _ => None,
    };

    if let Some(end) = previous_end {
        return BlockRange::new(end.saturating_sub(span).max(1), end);
    }

    let end = head;
    let mut start = end.saturating_sub(span).max(1);
    if let Some(c) = cached {
        if c.latest_scanned_block > 0 && c.latest_scanned_block < end {
            start = start.max(c.latest_scanned_block + 1);
        }
    }
    BlockRange::new(start, end)
}

/// Summary of a completed scan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub chain_id: u64,
    pub account: Address,
    pub range: BlockRange,
    /// Estimated seconds per block used for planning.
    pub block_time: f64,
    /// Candidate pairs found in logs before confirmation.
    pub candidates: usize,
    /// Approvals confirmed live by this scan.
    pub confirmed: ConfirmedApprovals,
    /// Windows inside `range` whose logs were never fetched.
    pub skipped: Vec<SkippedRange>,
    /// Whether the merged cache was written.
    pub persisted: bool,
    /// Cache record after the merge.
    pub cache: ScanCache,
}

/// Runs scans for one client and store. At most one scan is in flight.
pub struct Scanner<C, S> {
    client: C,
    cache: CacheStore<S>,
    metadata: MetadataCache,
    settings: ScanSettings,
    generation: AtomicU64,
    in_flight: Mutex<Option<(u64, CancellationToken)>>,
}

impl<C: EvmClient, S: KvStore> Scanner<C, S> {
    pub fn new(client: C, store: S, settings: ScanSettings) -> Self {
        Self {
            client,
            cache: CacheStore::new(store),
            metadata: MetadataCache::default(),
            settings,
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        }
    }

    pub fn with_metadata_cache(mut self, metadata: MetadataCache) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn cache_store(&self) -> &CacheStore<S> {
        &self.cache
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Cancel the scan in flight, if any.
    pub fn cancel(&self) {
        let slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, token)) = slot.as_ref() {
            token.cancel();
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Cancel any previous scan and install a fresh token.
    fn begin(&self) -> (u64, CancellationToken) {
        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((prev, old)) = slot.replace((id, token.clone())) {
            tracing::info!(scan = prev, "cancelling previous scan");
            old.cancel();
        }
        (id, token)
    }

    fn finish(&self, id: u64) {
        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
            *slot = None;
        }
    }

    /// Scan one window for `account` and merge the result into the cache.
    pub async fn scan(
        &self,
        account: Address,
        direction: ScanDirection,
        progress: &dyn ProgressSink,
    ) -> Result<ScanReport, ScanError> {
        if account.is_zero() {
            return Err(ScanError::NoAccount);
        }
        let (id, cancel) = self.begin();
        let started = Instant::now();

        let result = self.run(account, direction, progress, &cancel).await;
        self.finish(id);

        let elapsed = started.elapsed().as_millis() as u64;
        match &result {
            Ok(report) => {
                metrics::record_scan("ok", elapsed);
                tracing::info!(
                    %account,
                    chain_id = report.chain_id,
                    range = %report.range,
                    confirmed = report.confirmed.len(),
                    skipped = report.skipped.len(),
                    elapsed_ms = elapsed,
                    "scan complete"
                );
            }
            Err(e) if e.is_aborted() => {
                metrics::record_scan("aborted", elapsed);
                tracing::info!(%account, "scan cancelled");
            }
            Err(e) => {
                metrics::record_scan("error", elapsed);
                tracing::warn!(%account, error = %e, "scan failed");
            }
        }
        result
    }

    async fn run(
        &self,
        account: Address,
        direction: ScanDirection,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        progress.on_progress(1, "Preparing…");

        let chain_id = self.client.chain_id().await?;
        let head = self.client.block_number().await?;
        let block_time = estimate_block_time(&self.client, head).await;
        let blocks = blocks_for_days(self.settings.days_per_scan, block_time);

        let cached = self.cache.load(chain_id, account);
        let range = plan_range(direction, head, blocks, cached.as_ref());
        let hint = cached.as_ref().map(|c| c.window_hint).unwrap_or(0);

        tracing::info!(
            chain_id,
            head,
            block_time,
            range = %range,
            ?direction,
            "starting scan"
        );

        let owner = Some(address_topic(account));

        // Phase A: Approval(owner, ..)
        progress.on_progress(3, "Scanning approvals…");
        let approvals = fetch_logs_adaptive(
            &self.client,
            &LogFilter::with_topics(vec![Some(approval_topic()), owner]),
            range,
            hint,
            &self.settings.fetch,
            &Scaled::new(progress, 0, 60, "Approvals"),
            cancel,
        )
        .await?;
        let mut candidates = extract::extract(&approvals.logs);

        // Phase B: ApprovalForAll(owner, ..)
        progress.on_progress(62, "Scanning operators…");
        let operators = fetch_logs_adaptive(
            &self.client,
            &LogFilter::with_topics(vec![Some(approval_for_all_topic()), owner]),
            range,
            approvals.window_hint,
            &self.settings.fetch,
            &Scaled::new(progress, 60, 20, "Operators"),
            cancel,
        )
        .await?;
        extract::extend(&mut candidates, &operators.logs);

        // Phase C: live state
        progress.on_progress(82, "Confirming current state…");
        let confirmation = confirm_candidates(
            &self.client,
            account,
            &candidates,
            &self.metadata,
            chain_id,
            &Scaled::new(progress, 80, 20, "Confirming"),
            cancel,
        )
        .await?;

        let result = ScanResult {
            range,
            window_hint: approvals.window_hint,
            head,
            scanned_at: now_ms(),
            confirmed: confirmation.live,
            stale: confirmation.stale,
        };
        let merged = ScanCache::merge(cached.as_ref(), &result);
        let persisted = match self.cache.save(chain_id, account, &merged) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(chain_id, %account, error = %e, "failed to persist scan cache");
                false
            }
        };

        progress.on_progress(100, "Done");

        let mut skipped = approvals.skipped;
        skipped.extend(operators.skipped);

        Ok(ScanReport {
            chain_id,
            account,
            range,
            block_time,
            candidates: candidates.total(),
            confirmed: result.confirmed,
            skipped,
            persisted,
            cache: merged,
        })
    }

    /// Cached record for `account` on the client's chain.
    pub async fn cached(&self, account: Address) -> Result<Option<ScanCache>, ScanError> {
        let chain_id = self.client.chain_id().await?;
        Ok(self.cache.load(chain_id, account))
    }

    pub async fn clear_cache(&self, account: Address) -> Result<(), ScanError> {
        let chain_id = self.client.chain_id().await?;
        self.cache.clear(chain_id, account)?;
        tracing::info!(chain_id, %account, "scan cache cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::store::MemoryStore;
    use crate::testing::MockChain;
    use std::sync::Arc;

    fn cache_covering(from: u64, to: u64) -> ScanCache {
        ScanCache::merge(
            None,
            &ScanResult {
                range: BlockRange::new(from, to),
                window_hint: 0,
                head: to,
                scanned_at: 0,
                confirmed: ConfirmedApprovals::default(),
                stale: Default::default(),
            },
        )
    }

    #[test]
    fn test_plan_latest_without_cache() {
        assert_eq!(
            plan_range(ScanDirection::Latest, 100_000, 50_400, None),
            BlockRange::new(49_601, 100_000)
        );
        // young chain clamps to block 1
        assert_eq!(
            plan_range(ScanDirection::Latest, 1_000, 50_400, None),
            BlockRange::new(1, 1_000)
        );
    }

    #[test]
    fn test_plan_latest_resumes_after_cache() {
        let cache = cache_covering(80_000, 95_000);
        assert_eq!(
            plan_range(ScanDirection::Latest, 100_000, 50_400, Some(&cache)),
            BlockRange::new(95_001, 100_000)
        );
        // cache already at head: rescan the full window
        let fresh = cache_covering(80_000, 100_000);
        assert_eq!(
            plan_range(ScanDirection::Latest, 100_000, 50_400, Some(&fresh)),
            BlockRange::new(49_601, 100_000)
        );
    }

    #[test]
    fn test_plan_previous() {
        let cache = cache_covering(80_000, 100_000);
        assert_eq!(
            plan_range(ScanDirection::Previous, 100_000, 10_000, Some(&cache)),
            BlockRange::new(70_000, 79_999)
        );
        let near_genesis = cache_covering(1, 100);
        assert_eq!(
            plan_range(ScanDirection::Previous, 100_000, 10_000, Some(&near_genesis)),
            BlockRange::new(1, 1)
        );
        // no cache: same as latest
        assert_eq!(
            plan_range(ScanDirection::Previous, 100_000, 10_000, None),
            plan_range(ScanDirection::Latest, 100_000, 10_000, None)
        );
    }

    #[tokio::test]
    async fn test_scan_persists_and_reports() {
        let chain = Arc::new(MockChain::new(1, 60_000, 12));
        let store = Arc::new(MemoryStore::new());
        let scanner = Scanner::new(chain.clone(), store.clone(), ScanSettings::default());
        let account = Address::repeat_byte(0x0a);

        let report = scanner
            .scan(account, ScanDirection::Latest, &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.range, BlockRange::new(9_601, 60_000));
        assert!(report.persisted);
        assert!(report.skipped.is_empty());
        assert!(!scanner.is_scanning());
        assert_eq!(store.keys().len(), 1);
        assert!(scanner.cached(account).await.unwrap().is_some());

        scanner.clear_cache(account).await.unwrap();
        assert!(scanner.cached(account).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_account_rejected() {
        let chain = Arc::new(MockChain::new(1, 60_000, 12));
        let scanner = Scanner::new(chain.clone(), MemoryStore::new(), ScanSettings::default());

        let err = scanner
            .scan(Address::ZERO, ScanDirection::Latest, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::NoAccount));
        assert!(chain.get_logs_calls().is_empty());
    }

    #[tokio::test]
    async fn test_progress_phases() {
        let chain = MockChain::new(1, 60_000, 12);
        let scanner = Scanner::new(chain, MemoryStore::new(), ScanSettings::default());
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = |pct: u8, label: &str| seen.lock().unwrap().push((pct, label.to_string()));

        scanner
            .scan(Address::repeat_byte(0x0a), ScanDirection::Latest, &sink)
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.first().unwrap().0, 1);
        assert_eq!(seen.last().unwrap(), &(100, "Done".to_string()));
        assert!(seen.iter().any(|(p, l)| *p == 62 && l.starts_with("Scanning operators")));
        assert!(seen.iter().any(|(_, l)| l.starts_with("Approvals • Blocks")));
    }
}

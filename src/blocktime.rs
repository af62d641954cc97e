//! Average block time estimation and day-to-block conversion.

use crate::rpc::EvmClient;

/// Block time assumed when the estimate cannot be computed.
pub const DEFAULT_BLOCK_TIME_SECS: f64 = 2.0;

/// Distance between the two sampled blocks.
pub const SAMPLE_DISTANCE: u64 = 1000;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Estimate seconds per block from the timestamps of `head` and
/// `head - 1000` (block 0 on younger chains). Falls back to
/// [`DEFAULT_BLOCK_TIME_SECS`] when either block is unavailable.
pub async fn estimate_block_time<C: EvmClient + ?Sized>(client: &C, head: u64) -> f64 {
    let past = head.saturating_sub(SAMPLE_DISTANCE);
    let blocks = (head - past).max(1);
    let (newer, older) = futures::join!(client.block_timestamp(head), client.block_timestamp(past));

    match (newer, older) {
        (Ok(Some(t1)), Ok(Some(t0))) => {
            let secs = t1.saturating_sub(t0) as f64 / blocks as f64;
            secs.max(1.0)
        }
        (newer, older) => {
            tracing::debug!(
                head,
                newer_ok = newer.is_ok(),
                older_ok = older.is_ok(),
                "block timestamps unavailable, using default block time"
            );
            DEFAULT_BLOCK_TIME_SECS
        }
    }
}

/// Number of blocks spanning `days` at `secs_per_block`, rounded up, at least one.
pub fn blocks_for_days(days: u32, secs_per_block: f64) -> u64 {
    let secs = if secs_per_block.is_finite() && secs_per_block > 0.0 {
        secs_per_block
    } else {
        DEFAULT_BLOCK_TIME_SECS
    };
    let blocks = (days as f64 * SECONDS_PER_DAY / secs).ceil();
    (blocks as u64).max(1)
}

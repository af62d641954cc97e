//! Counters and histograms for scanning and revocation.
//!
//! Recorded through the `metrics` facade; they are no-ops unless the
//! embedding application installs a recorder.

use metrics::{counter, histogram};

/// Record an RPC call.
pub fn record_rpc_call(method: &str, success: bool, duration_ms: u64) {
    counter!("rpc_calls_total", "method" => method.to_string(), "success" => success.to_string())
        .increment(1);
    histogram!("rpc_call_duration_ms").record(duration_ms as f64);
}

/// Record a log window that was given up on.
pub fn record_window_skipped(reason: &str) {
    counter!("log_windows_skipped_total", "reason" => reason.to_string()).increment(1);
}

/// Record a window-size reduction after a range-too-large rejection.
pub fn record_window_shrink(new_size: u64) {
    counter!("log_window_shrinks_total").increment(1);
    histogram!("log_window_size").record(new_size as f64);
}

/// Record the outcome of confirming one candidate.
pub fn record_confirmation(kind: &str, live: bool) {
    counter!("confirmations_total", "kind" => kind.to_string(), "live" => live.to_string())
        .increment(1);
}

/// Record a finished scan.
pub fn record_scan(outcome: &str, duration_ms: u64) {
    counter!("scans_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("scan_duration_ms").record(duration_ms as f64);
}

/// Record a revoke or approve transaction.
pub fn record_transaction(kind: &str, success: bool) {
    counter!("transactions_total", "kind" => kind.to_string(), "success" => success.to_string())
        .increment(1);
}

/// Record a token metadata cache hit.
pub fn record_cache_hit() {
    counter!("metadata_cache_hits_total").increment(1);
}

/// Record a token metadata cache miss.
pub fn record_cache_miss() {
    counter!("metadata_cache_misses_total").increment(1);
}

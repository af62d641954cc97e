//! In-process token metadata cache.
//!
//! Caches `symbol()` / `decimals()` results keyed by `(chain_id, contract)`
//! so repeated scans in one session do not re-read them.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use moka::sync::Cache;

use crate::metrics;

/// Metadata read from a token contract. `None` means the read failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMetadata {
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

/// Cache for token metadata.
#[derive(Clone)]
pub struct MetadataCache {
    inner: Arc<Cache<(u64, Address), TokenMetadata>>,
}

impl MetadataCache {
    /// Create a new metadata cache with the given TTL and max entries.
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self {
            inner: Arc::new(cache),
        }
    }

    pub fn get(&self, chain_id: u64, contract: Address) -> Option<TokenMetadata> {
        let hit = self.inner.get(&(chain_id, contract));
        if hit.is_some() {
            metrics::record_cache_hit();
        } else {
            metrics::record_cache_miss();
        }
        hit
    }

    /// Store metadata. Entries where every read failed are not cached so the
    /// next scan tries again.
    pub fn insert(&self, chain_id: u64, contract: Address, meta: TokenMetadata) {
        if meta.symbol.is_none() && meta.decimals.is_none() {
            return;
        }
        self.inner.insert((chain_id, contract), meta);
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), 10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_by_chain_and_contract() {
        let cache = MetadataCache::default();
        let token = Address::repeat_byte(0xaa);
        let meta = TokenMetadata {
            symbol: Some("USDC".into()),
            decimals: Some(6),
        };
        cache.insert(1, token, meta.clone());
        assert_eq!(cache.get(1, token), Some(meta));
        assert_eq!(cache.get(2, token), None);
    }

    #[test]
    fn test_failed_reads_not_cached() {
        let cache = MetadataCache::default();
        let token = Address::repeat_byte(0xaa);
        cache.insert(1, token, TokenMetadata::default());
        assert_eq!(cache.get(1, token), None);
    }
}

//! Persistent per-(chain, account) scan cache.
//!
//! Each scan is merged into the previous record: block bounds grow to cover
//! both scans and every approval collection is merged last-write-wins by its
//! uniqueness key. Entries the new scan read back as no longer approved are
//! dropped. Entries the new scan did not touch are kept, so previously
//! discovered approvals survive a scan of a different window.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::approval::{
    BlockRange, ConfirmedApprovals, Erc20Approval, Erc721TokenApproval, OperatorApproval,
};
use crate::error::StoreError;
use crate::extract::Candidates;
use crate::store::KvStore;

/// Schema version of persisted records. Anything else is ignored on load.
pub const CACHE_VERSION: u32 = 1;

/// Storage key for one (chain, account) pair.
pub fn cache_key(chain_id: u64, account: Address) -> String {
    format!("revoker:v1:{}:0x{}", chain_id, hex::encode(account))
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Persisted scan state for one (chain, account).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCache {
    pub v: u32,
    /// Milliseconds since epoch of the last merge.
    pub last_scan_at: i64,
    pub latest_head_at_scan: u64,
    pub earliest_scanned_block: u64,
    pub latest_scanned_block: u64,
    /// Last window size that worked; seeds the next fetch.
    #[serde(default)]
    pub window_hint: u64,
    #[serde(default)]
    pub erc20: Vec<Erc20Approval>,
    #[serde(default)]
    pub erc721_tokens: Vec<Erc721TokenApproval>,
    #[serde(default)]
    pub operators: Vec<OperatorApproval>,
}

/// Output of one completed scan, ready to merge.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub range: BlockRange,
    pub window_hint: u64,
    pub head: u64,
    pub scanned_at: i64,
    pub confirmed: ConfirmedApprovals,
    /// Pairs this scan read back as unapproved.
    pub stale: Candidates,
}

/// Replace the entry with the same key in place, or append.
fn upsert<T, K: PartialEq>(list: &mut Vec<T>, items: &[T], key: impl Fn(&T) -> K)
where
    T: Clone,
{
    for item in items {
        let k = key(item);
        match list.iter().position(|existing| key(existing) == k) {
            Some(i) => list[i] = item.clone(),
            None => list.push(item.clone()),
        }
    }
}

impl ScanCache {
    /// Merge a scan into the previous record (if any).
    pub fn merge(prev: Option<&ScanCache>, result: &ScanResult) -> ScanCache {
        let Some(prev) = prev else {
            return ScanCache {
                v: CACHE_VERSION,
                last_scan_at: result.scanned_at,
                latest_head_at_scan: result.head,
                earliest_scanned_block: result.range.from,
                latest_scanned_block: result.range.to,
                window_hint: result.window_hint,
                erc20: result.confirmed.erc20.clone(),
                erc721_tokens: result.confirmed.erc721_tokens.clone(),
                operators: result.confirmed.operators.clone(),
            };
        };

        let mut next = prev.clone();
        next.v = CACHE_VERSION;
        next.last_scan_at = result.scanned_at;
        next.latest_head_at_scan = result.head;
        next.earliest_scanned_block = prev.earliest_scanned_block.min(result.range.from);
        next.latest_scanned_block = prev.latest_scanned_block.max(result.range.to);
        if result.window_hint > 0 {
            next.window_hint = result.window_hint;
        }
        let stale = &result.stale;
        next.erc20.retain(|a| !stale.has_erc20(a.token, a.spender));
        next.erc721_tokens
            .retain(|a| !stale.has_erc721(a.contract, a.token_id));
        next.operators
            .retain(|a| !stale.has_operator(a.contract, a.operator));

        upsert(&mut next.erc20, &result.confirmed.erc20, Erc20Approval::key);
        upsert(
            &mut next.erc721_tokens,
            &result.confirmed.erc721_tokens,
            Erc721TokenApproval::key,
        );
        upsert(&mut next.operators, &result.confirmed.operators, OperatorApproval::key);
        next
    }

    pub fn approvals(&self) -> ConfirmedApprovals {
        ConfirmedApprovals {
            erc20: self.erc20.clone(),
            erc721_tokens: self.erc721_tokens.clone(),
            operators: self.operators.clone(),
        }
    }

    pub fn scanned_range(&self) -> BlockRange {
        BlockRange::new(self.earliest_scanned_block, self.latest_scanned_block)
    }

    /// Returns whether an entry was removed.
    pub fn remove_erc20(&mut self, token: Address, spender: Address) -> bool {
        let before = self.erc20.len();
        self.erc20.retain(|a| a.key() != (token, spender));
        self.erc20.len() != before
    }

    pub fn remove_erc721(&mut self, contract: Address, token_id: U256) -> bool {
        let before = self.erc721_tokens.len();
        self.erc721_tokens.retain(|a| a.key() != (contract, token_id));
        self.erc721_tokens.len() != before
    }

    pub fn remove_operator(&mut self, contract: Address, operator: Address) -> bool {
        let before = self.operators.len();
        self.operators.retain(|a| a.key() != (contract, operator));
        self.operators.len() != before
    }
}

// ---------------------------------------------------------------------------
// Store wrapper
// ---------------------------------------------------------------------------

/// Typed access to [`ScanCache`] records in a [`KvStore`].
#[derive(Debug, Clone)]
pub struct CacheStore<S> {
    store: S,
}

impl<S: KvStore> CacheStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Load the record for `(chain_id, account)`. Unreadable, unparsable or
    /// wrong-version records are treated as absent.
    pub fn load(&self, chain_id: u64, account: Address) -> Option<ScanCache> {
        let key = cache_key(chain_id, account);
        let raw = match self.store.get(&key) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(%key, error = %e, "failed to read scan cache");
                return None;
            }
        };
        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(%key, error = %e, "ignoring corrupt scan cache");
                return None;
            }
        };
        let version = value.get("v").and_then(serde_json::Value::as_u64);
        if version != Some(CACHE_VERSION as u64) {
            tracing::info!(%key, ?version, "ignoring scan cache with unsupported version");
            return None;
        }
        match serde_json::from_value(value) {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!(%key, error = %e, "ignoring malformed scan cache");
                None
            }
        }
    }

    pub fn save(
        &self,
        chain_id: u64,
        account: Address,
        cache: &ScanCache,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(cache)?;
        self.store.set(&cache_key(chain_id, account), &json)
    }

    pub fn clear(&self, chain_id: u64, account: Address) -> Result<(), StoreError> {
        self.store.remove(&cache_key(chain_id, account))
    }

    /// Apply `edit` to the stored record and persist it if anything changed.
    /// Returns the resulting record, or `None` when nothing is cached.
    fn update(
        &self,
        chain_id: u64,
        account: Address,
        edit: impl FnOnce(&mut ScanCache) -> bool,
    ) -> Result<Option<ScanCache>, StoreError> {
        let Some(mut cache) = self.load(chain_id, account) else {
            return Ok(None);
        };
        if edit(&mut cache) {
            self.save(chain_id, account, &cache)?;
        }
        Ok(Some(cache))
    }

    pub fn remove_erc20(
        &self,
        chain_id: u64,
        account: Address,
        token: Address,
        spender: Address,
    ) -> Result<Option<ScanCache>, StoreError> {
        self.update(chain_id, account, |c| c.remove_erc20(token, spender))
    }

    pub fn remove_erc721(
        &self,
        chain_id: u64,
        account: Address,
        contract: Address,
        token_id: U256,
    ) -> Result<Option<ScanCache>, StoreError> {
        self.update(chain_id, account, |c| c.remove_erc721(contract, token_id))
    }

    pub fn remove_operator(
        &self,
        chain_id: u64,
        account: Address,
        contract: Address,
        operator: Address,
    ) -> Result<Option<ScanCache>, StoreError> {
        self.update(chain_id, account, |c| c.remove_operator(contract, operator))
    }
}

//! approval-scanner — find and revoke live token approvals on EVM chains
//!
//! Scans an account's `Approval` / `ApprovalForAll` event history with an
//! adaptive `eth_getLogs` walker, confirms every candidate against current
//! contract state and keeps a per-chain, per-account cache that grows with
//! each scan.
//!
//! # Approval kinds
//!
//! - **ERC-20 allowances**: `allowance(owner, spender) > 0`
//! - **ERC-721 token approvals**: `getApproved(tokenId) != 0x0`
//! - **Operators**: `isApprovedForAll(owner, operator)` on ERC-721 / ERC-1155

pub mod abi;
pub mod allowance;
pub mod approval;
pub mod blocktime;
pub mod cache;
pub mod config;
pub mod confirm;
pub mod contract;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod metadata;
pub mod metrics;
pub mod progress;
pub mod revoke;
pub mod rpc;
pub mod scan;
pub mod store;
pub mod units;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use std::path::PathBuf;

use alloy_primitives::Address;
use eyre::{Result, WrapErr};

pub use approval::{
    AllowanceLabel, BlockRange, ConfirmedApprovals, Erc20Approval, Erc721TokenApproval,
    OperatorApproval, Standard,
};
pub use cache::{CacheStore, ScanCache};
pub use revoke::{RevokeTarget, Revoker};
pub use rpc::{EvmClient, HttpClient};
pub use scan::{ScanDirection, ScanReport, ScanSettings, Scanner};
pub use store::{FileStore, KvStore, MemoryStore};

// ---------------------------------------------------------------------------
// Directory helpers
// ---------------------------------------------------------------------------

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("approval-scanner")
}

/// Default location of persisted scan caches.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| config_dir().join("cache"))
        .join("approval-scanner")
}

// ---------------------------------------------------------------------------
// Input parsing
// ---------------------------------------------------------------------------

/// Parse a `0x`-prefixed hex address.
pub fn parse_address(s: &str) -> Result<Address> {
    s.trim()
        .parse::<Address>()
        .wrap_err_with(|| format!("invalid address: {s}"))
}

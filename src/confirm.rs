//! Confirm candidate approvals against live contract state.
//!
//! Logs only say an approval *was* granted. Each candidate is re-read with a
//! view call and dropped unless it is still in force: a non-zero allowance,
//! a non-zero `getApproved`, or `isApprovedForAll == true`. Reads are
//! independent, so a broken contract drops its own candidates and nothing
//! else.

use alloy_primitives::{Address, U256};
use tokio_util::sync::CancellationToken;

use crate::approval::{
    AllowanceLabel, ConfirmedApprovals, Erc20Approval, Erc721TokenApproval, OperatorApproval,
    DEFAULT_NFT_SYMBOL, DEFAULT_TOKEN_SYMBOL,
};
use crate::contract;
use crate::error::ScanError;
use crate::extract::{Candidate, Candidates};
use crate::metadata::{MetadataCache, TokenMetadata};
use crate::metrics;
use crate::progress::{percent, ProgressSink};
use crate::rpc::EvmClient;

/// Counts planned reads and reports progress after each.
struct ReadCounter<'a> {
    done: u64,
    total: u64,
    progress: &'a dyn ProgressSink,
}

impl ReadCounter<'_> {
    fn tick(&mut self, label: &str) {
        self.done += 1;
        self.progress
            .on_progress(percent(self.done, self.total), label);
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<(), ScanError> {
    if cancel.is_cancelled() {
        Err(ScanError::Aborted)
    } else {
        Ok(())
    }
}

/// Read `symbol()` / `decimals()` once per contract, through the cache.
async fn token_metadata<C: EvmClient + ?Sized>(
    client: &C,
    cache: &MetadataCache,
    chain_id: u64,
    token: Address,
    want_decimals: bool,
) -> TokenMetadata {
    if let Some(hit) = cache.get(chain_id, token) {
        if hit.decimals.is_some() || !want_decimals {
            return hit;
        }
    }
    let symbol = contract::symbol(client, token).await.ok();
    let decimals = if want_decimals {
        contract::decimals(client, token).await.ok()
    } else {
        None
    };
    let meta = TokenMetadata { symbol, decimals };
    cache.insert(chain_id, token, meta.clone());
    meta
}

/// Outcome of checking a set of candidates.
#[derive(Debug, Clone, Default)]
pub struct Confirmation {
    /// Approvals still in force.
    pub live: ConfirmedApprovals,
    /// Candidates whose read succeeded and showed no approval. Failed reads
    /// appear in neither set.
    pub stale: Candidates,
}

/// Check every candidate against current contract state.
pub async fn confirm_candidates<C: EvmClient + ?Sized>(
    client: &C,
    owner: Address,
    candidates: &Candidates,
    metadata: &MetadataCache,
    chain_id: u64,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<Confirmation, ScanError> {
    let mut out = ConfirmedApprovals::default();
    let mut stale = Candidates::default();
    let mut counter = ReadCounter {
        done: 0,
        total: candidates.total() as u64,
        progress,
    };

    // ERC-20 allowances
    for (&token, spenders) in &candidates.erc20 {
        check_cancel(cancel)?;
        let meta = token_metadata(client, metadata, chain_id, token, true).await;
        let symbol = meta
            .symbol
            .unwrap_or_else(|| DEFAULT_TOKEN_SYMBOL.to_string());

        for &spender in spenders {
            check_cancel(cancel)?;
            let live = match contract::allowance(client, token, owner, spender).await {
                Ok(value) if value > U256::ZERO => {
                    out.erc20.push(Erc20Approval {
                        token,
                        symbol: symbol.clone(),
                        decimals: meta.decimals,
                        spender,
                        allowance: AllowanceLabel::from_amount(value, meta.decimals),
                    });
                    true
                }
                Ok(_) => {
                    stale.insert(Candidate::TokenAllowance { token, spender });
                    false
                }
                Err(e) => {
                    tracing::debug!(%token, %spender, error = %e, "allowance read failed");
                    false
                }
            };
            metrics::record_confirmation("erc20", live);
            counter.tick(&format!("Checking {} allowance", symbol));
        }
    }

    // Single-token NFT approvals
    for (&collection, token_ids) in &candidates.erc721 {
        check_cancel(cancel)?;
        let symbol = token_metadata(client, metadata, chain_id, collection, false)
            .await
            .symbol
            .unwrap_or_else(|| DEFAULT_NFT_SYMBOL.to_string());

        for &token_id in token_ids {
            check_cancel(cancel)?;
            let live = match contract::get_approved(client, collection, token_id).await {
                Ok(approved) if approved != Address::ZERO => {
                    out.erc721_tokens.push(Erc721TokenApproval {
                        contract: collection,
                        symbol: symbol.clone(),
                        token_id,
                        approved,
                    });
                    true
                }
                Ok(_) => {
                    stale.insert(Candidate::NftToken {
                        contract: collection,
                        token_id,
                    });
                    false
                }
                Err(e) => {
                    tracing::debug!(%collection, %token_id, error = %e, "getApproved read failed");
                    false
                }
            };
            metrics::record_confirmation("erc721", live);
            counter.tick(&format!("Checking {} #{}", symbol, token_id));
        }
    }

    // Operator grants
    for (&collection, operators) in &candidates.operators {
        check_cancel(cancel)?;
        let standard = contract::probe_standard(client, collection).await;

        for &operator in operators {
            check_cancel(cancel)?;
            let live = match contract::is_approved_for_all(client, collection, owner, operator)
                .await
            {
                Ok(true) => {
                    out.operators.push(OperatorApproval {
                        contract: collection,
                        standard,
                        operator,
                        approved: true,
                    });
                    true
                }
                Ok(false) => {
                    stale.insert(Candidate::Operator {
                        contract: collection,
                        operator,
                    });
                    false
                }
                Err(e) => {
                    tracing::debug!(%collection, %operator, error = %e, "isApprovedForAll read failed");
                    false
                }
            };
            metrics::record_confirmation("operator", live);
            counter.tick(&format!("Checking {} operator", standard.as_str()));
        }
    }

    tracing::info!(
        candidates = candidates.total(),
        erc20 = out.erc20.len(),
        erc721 = out.erc721_tokens.len(),
        operators = out.operators.len(),
        stale = stale.total(),
        "confirmation complete"
    );

    Ok(Confirmation { live: out, stale })
}

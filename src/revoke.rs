//! Revocation transactions.
//!
//! Each revoke sends one transaction, waits for a successful receipt and then
//! drops the entry from the persisted cache. A [`Revoker`] tracks the single
//! row being revoked and refuses to start another until it finishes.

use std::sync::Mutex;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;

use crate::abi::{self, IERC721};
use crate::approval::{Erc20Approval, Erc721TokenApproval, OperatorApproval};
use crate::cache::CacheStore;
use crate::contract::send_and_confirm;
use crate::error::TxError;
use crate::metrics;
use crate::rpc::EvmClient;
use crate::store::KvStore;

/// An approval to revoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeTarget {
    /// `approve(spender, 0)` on the token.
    Erc20 { token: Address, spender: Address },
    /// `approve(0x0, tokenId)` on the collection.
    Erc721 { contract: Address, token_id: U256 },
    /// `setApprovalForAll(operator, false)`; same selector on ERC-721 and ERC-1155.
    Operator { contract: Address, operator: Address },
}

impl RevokeTarget {
    /// UI row key, matching the record types' `row_key`.
    pub fn row_key(&self) -> String {
        match self {
            Self::Erc20 { token, spender } => format!("erc20:{token}:{spender}"),
            Self::Erc721 { contract, token_id } => format!("erc721:{contract}:{token_id}"),
            Self::Operator { contract, operator } => format!("op:{contract}:{operator}"),
        }
    }

    /// Contract the transaction is sent to.
    pub fn contract(&self) -> Address {
        match self {
            Self::Erc20 { token, .. } => *token,
            Self::Erc721 { contract, .. } | Self::Operator { contract, .. } => *contract,
        }
    }

    pub fn calldata(&self) -> Bytes {
        match self {
            Self::Erc20 { spender, .. } => abi::approve(*spender, U256::ZERO),
            Self::Erc721 { token_id, .. } => IERC721::approveCall {
                to: Address::ZERO,
                tokenId: *token_id,
            }
            .abi_encode()
            .into(),
            Self::Operator { operator, .. } => abi::set_approval_for_all(*operator, false),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Erc20 { .. } => "revoke_erc20",
            Self::Erc721 { .. } => "revoke_erc721",
            Self::Operator { .. } => "revoke_operator",
        }
    }
}

impl From<&Erc20Approval> for RevokeTarget {
    fn from(a: &Erc20Approval) -> Self {
        Self::Erc20 {
            token: a.token,
            spender: a.spender,
        }
    }
}

impl From<&Erc721TokenApproval> for RevokeTarget {
    fn from(a: &Erc721TokenApproval) -> Self {
        Self::Erc721 {
            contract: a.contract,
            token_id: a.token_id,
        }
    }
}

impl From<&OperatorApproval> for RevokeTarget {
    fn from(a: &OperatorApproval) -> Self {
        Self::Operator {
            contract: a.contract,
            operator: a.operator,
        }
    }
}

/// Clears the busy marker when the revoke ends, however it ends.
struct BusyGuard<'a> {
    slot: &'a Mutex<Option<String>>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Sends revocations for one account.
pub struct Revoker<C, S> {
    client: C,
    cache: CacheStore<S>,
    busy: Mutex<Option<String>>,
}

impl<C: EvmClient, S: KvStore> Revoker<C, S> {
    pub fn new(client: C, store: S) -> Self {
        Self {
            client,
            cache: CacheStore::new(store),
            busy: Mutex::new(None),
        }
    }

    /// Row key of the revoke in progress.
    pub fn busy_row(&self) -> Option<String> {
        self.busy.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn acquire(&self, row: String) -> Result<BusyGuard<'_>, TxError> {
        let mut slot = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = slot.as_ref() {
            return Err(TxError::Busy(current.clone()));
        }
        *slot = Some(row);
        Ok(BusyGuard { slot: &self.busy })
    }

    /// Revoke `target` for `owner` and drop it from the cache.
    pub async fn revoke(&self, owner: Address, target: RevokeTarget) -> Result<B256, TxError> {
        let row = target.row_key();
        let _guard = self.acquire(row.clone())?;
        tracing::info!(%owner, %row, "revoking approval");

        let chain_id = self.client.chain_id().await?;
        let sent =
            send_and_confirm(&self.client, owner, target.contract(), target.calldata()).await;
        metrics::record_transaction(target.kind(), sent.is_ok());
        let tx_hash = sent?;

        let removed = match target {
            RevokeTarget::Erc20 { token, spender } => {
                self.cache.remove_erc20(chain_id, owner, token, spender)
            }
            RevokeTarget::Erc721 { contract, token_id } => {
                self.cache.remove_erc721(chain_id, owner, contract, token_id)
            }
            RevokeTarget::Operator { contract, operator } => {
                self.cache.remove_operator(chain_id, owner, contract, operator)
            }
        };
        if let Err(e) = removed {
            tracing::warn!(%row, error = %e, "revoked but failed to update scan cache");
        }

        tracing::info!(%row, %tx_hash, "approval revoked");
        Ok(tx_hash)
    }

    pub async fn revoke_erc20(
        &self,
        owner: Address,
        approval: &Erc20Approval,
    ) -> Result<B256, TxError> {
        self.revoke(owner, approval.into()).await
    }

    pub async fn revoke_erc721(
        &self,
        owner: Address,
        approval: &Erc721TokenApproval,
    ) -> Result<B256, TxError> {
        self.revoke(owner, approval.into()).await
    }

    pub async fn revoke_operator(
        &self,
        owner: Address,
        approval: &OperatorApproval,
    ) -> Result<B256, TxError> {
        self.revoke(owner, approval.into()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::IFACE_ERC721;
    use crate::store::MemoryStore;
    use crate::testing::MockChain;
    use std::sync::Arc;

    fn owner() -> Address {
        Address::repeat_byte(0x0a)
    }

    #[test]
    fn test_row_keys_match_records() {
        let rec = Erc20Approval {
            token: Address::repeat_byte(0xaa),
            symbol: "USDC".into(),
            decimals: Some(6),
            spender: Address::repeat_byte(0xbb),
            allowance: crate::approval::AllowanceLabel::Finite { text: "1".into() },
        };
        assert_eq!(RevokeTarget::from(&rec).row_key(), rec.row_key());

        let nft = Erc721TokenApproval {
            contract: Address::repeat_byte(0x71),
            symbol: "NFT".into(),
            token_id: U256::from(9u64),
            approved: Address::repeat_byte(0xbb),
        };
        assert_eq!(RevokeTarget::from(&nft).row_key(), nft.row_key());
    }

    #[test]
    fn test_calldata() {
        let spender = Address::repeat_byte(0xbb);
        let target = RevokeTarget::Erc20 {
            token: Address::repeat_byte(0xaa),
            spender,
        };
        assert_eq!(target.calldata(), abi::approve(spender, U256::ZERO));

        let op = RevokeTarget::Operator {
            contract: Address::repeat_byte(0x11),
            operator: spender,
        };
        assert_eq!(op.calldata(), abi::set_approval_for_all(spender, false));

        let nft = RevokeTarget::Erc721 {
            contract: Address::repeat_byte(0x71),
            token_id: U256::from(9u64),
        };
        let call = IERC721::approveCall::abi_decode(&nft.calldata(), true).unwrap();
        assert_eq!(call.to, Address::ZERO);
        assert_eq!(call.tokenId, U256::from(9u64));
    }

    #[tokio::test]
    async fn test_revoke_clears_on_chain_state() {
        let chain = Arc::new(MockChain::new(1, 100, 12));
        let token = Address::repeat_byte(0xaa);
        let spender = Address::repeat_byte(0xbb);
        let nft = Address::repeat_byte(0x71);
        chain.set_allowance(token, owner(), spender, U256::MAX);
        chain.set_interfaces(nft, &[IFACE_ERC721]);
        chain.set_token_approval(nft, U256::from(3u64), spender);

        let revoker = Revoker::new(chain.clone(), MemoryStore::new());
        revoker
            .revoke(owner(), RevokeTarget::Erc20 { token, spender })
            .await
            .unwrap();
        revoker
            .revoke(
                owner(),
                RevokeTarget::Erc721 {
                    contract: nft,
                    token_id: U256::from(3u64),
                },
            )
            .await
            .unwrap();

        assert_eq!(chain.allowance_of(token, owner(), spender), U256::ZERO);
        assert_eq!(chain.sent_transactions().len(), 2);
        assert_eq!(revoker.busy_row(), None);
    }

    #[tokio::test]
    async fn test_reverted_receipt_is_error() {
        let chain = MockChain::new(1, 100, 12);
        let token = Address::repeat_byte(0xaa);
        chain.revert_transactions_to(token);
        let revoker = Revoker::new(chain, MemoryStore::new());

        let err = revoker
            .revoke(
                owner(),
                RevokeTarget::Erc20 {
                    token,
                    spender: Address::repeat_byte(0xbb),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TxError::Rpc(crate::error::RpcError::Reverted { .. })));
        assert_eq!(revoker.busy_row(), None);
    }

    #[test]
    fn test_second_revoke_refused_while_busy() {
        let revoker = Revoker::new(MockChain::new(1, 100, 12), MemoryStore::new());
        let guard = revoker.acquire("erc20:a:b".into()).unwrap();
        assert_eq!(revoker.busy_row().as_deref(), Some("erc20:a:b"));
        assert!(matches!(
            revoker.acquire("op:c:d".into()),
            Err(TxError::Busy(row)) if row == "erc20:a:b"
        ));
        drop(guard);
        assert!(revoker.acquire("op:c:d".into()).is_ok());
    }
}

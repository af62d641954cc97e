//! In-memory EVM chain for tests.
//!
//! [`MockChain`] serves logs, answers the view calls in [`crate::abi`] from
//! tables, and applies `approve` / `setApprovalForAll` transactions to those
//! tables so revoke flows can be exercised end to end.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;

use crate::abi::{self, IERC165, IERC20, IERC721};
use crate::error::RpcError;
use crate::rpc::{EvmClient, Log, LogFilter, TxReceipt};

#[derive(Default)]
struct ChainState {
    chain_id: u64,
    head: u64,
    block_time: u64,
    missing_blocks: bool,
    logs: Vec<Log>,
    max_log_range: Option<u64>,
    failing_log_calls: u32,
    get_logs_calls: Vec<(u64, u64)>,
    symbols: HashMap<Address, String>,
    decimals: HashMap<Address, u8>,
    allowances: HashMap<(Address, Address, Address), U256>,
    token_approvals: HashMap<(Address, U256), Address>,
    operators: HashMap<(Address, Address, Address), bool>,
    interfaces: HashMap<Address, Vec<[u8; 4]>>,
    broken: HashSet<Address>,
    strict_approve: HashSet<Address>,
    reverting_txs: HashSet<Address>,
    sent: Vec<(Address, Address, Bytes)>,
    receipts: HashMap<B256, bool>,
}

/// Scriptable in-memory chain.
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    /// Chain with `head` blocks whose timestamps advance by `block_time`.
    pub fn new(chain_id: u64, head: u64, block_time: u64) -> Self {
        Self {
            state: Mutex::new(ChainState {
                chain_id,
                head,
                block_time,
                ..Default::default()
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ChainState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn set_head(&self, head: u64) {
        self.with_state(|s| s.head = head);
    }

    /// Make `eth_getBlockByNumber` return null for every block.
    pub fn hide_blocks(&self) {
        self.with_state(|s| s.missing_blocks = true);
    }

    /// Reject `eth_getLogs` ranges longer than `max` blocks.
    pub fn limit_log_range(&self, max: u64) {
        self.with_state(|s| s.max_log_range = Some(max));
    }

    /// Fail the next `n` `eth_getLogs` calls with a transport error.
    pub fn fail_log_calls(&self, n: u32) {
        self.with_state(|s| s.failing_log_calls = n);
    }

    pub fn get_logs_calls(&self) -> Vec<(u64, u64)> {
        self.with_state(|s| s.get_logs_calls.clone())
    }

    pub fn push_log(&self, log: Log) {
        self.with_state(|s| s.logs.push(log));
    }

    pub fn set_token(&self, token: Address, symbol: &str, decimals: u8) {
        self.with_state(|s| {
            s.symbols.insert(token, symbol.to_string());
            s.decimals.insert(token, decimals);
        });
    }

    pub fn set_symbol(&self, contract: Address, symbol: &str) {
        self.with_state(|s| s.symbols.insert(contract, symbol.to_string()));
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, value: U256) {
        self.with_state(|s| s.allowances.insert((token, owner, spender), value));
    }

    pub fn allowance_of(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.with_state(|s| {
            s.allowances
                .get(&(token, owner, spender))
                .copied()
                .unwrap_or_default()
        })
    }

    pub fn set_token_approval(&self, collection: Address, token_id: U256, approved: Address) {
        self.with_state(|s| s.token_approvals.insert((collection, token_id), approved));
    }

    pub fn set_operator(&self, collection: Address, owner: Address, operator: Address, on: bool) {
        self.with_state(|s| s.operators.insert((collection, owner, operator), on));
    }

    /// Register ERC-165 interfaces; also marks the contract as an NFT for
    /// `approve` semantics.
    pub fn set_interfaces(&self, contract: Address, ids: &[[u8; 4]]) {
        self.with_state(|s| s.interfaces.insert(contract, ids.to_vec()));
    }

    /// Every call to `contract` reverts.
    pub fn break_contract(&self, contract: Address) {
        self.with_state(|s| s.broken.insert(contract));
    }

    /// ERC-20 that rejects changing a non-zero allowance to another non-zero value.
    pub fn require_zero_first(&self, token: Address) {
        self.with_state(|s| s.strict_approve.insert(token));
    }

    /// Transactions to `contract` are mined with status 0.
    pub fn revert_transactions_to(&self, contract: Address) {
        self.with_state(|s| s.reverting_txs.insert(contract));
    }

    pub fn sent_transactions(&self) -> Vec<(Address, Address, Bytes)> {
        self.with_state(|s| s.sent.clone())
    }
}

fn reverted() -> RpcError {
    RpcError::Rpc {
        code: 3,
        message: "execution reverted".to_string(),
        data: None,
    }
}

fn selector_of(data: &[u8]) -> Result<[u8; 4], RpcError> {
    data.get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(reverted)
}

fn decode<T: SolCall>(data: &[u8]) -> Result<T, RpcError> {
    T::abi_decode(data, true).map_err(|_| reverted())
}

impl ChainState {
    fn is_nft(&self, contract: &Address) -> bool {
        self.interfaces.contains_key(contract)
    }

    fn view(&self, to: Address, data: &[u8]) -> Result<Bytes, RpcError> {
        if self.broken.contains(&to) {
            return Err(reverted());
        }
        let selector = selector_of(data)?;

        let out = if selector == IERC20::allowanceCall::SELECTOR {
            let call: IERC20::allowanceCall = decode(data)?;
            let key = (to, call.owner, call.spender);
            let v = self.allowances.get(&key).copied().unwrap_or_default();
            IERC20::allowanceCall::abi_encode_returns(&(v,))
        } else if selector == IERC20::symbolCall::SELECTOR {
            let s = self.symbols.get(&to).ok_or_else(reverted)?;
            IERC20::symbolCall::abi_encode_returns(&(s.clone(),))
        } else if selector == IERC20::decimalsCall::SELECTOR {
            let d = self.decimals.get(&to).ok_or_else(reverted)?;
            IERC20::decimalsCall::abi_encode_returns(&(*d,))
        } else if selector == IERC721::getApprovedCall::SELECTOR {
            let call: IERC721::getApprovedCall = decode(data)?;
            let approved = self
                .token_approvals
                .get(&(to, call.tokenId))
                .copied()
                .unwrap_or(Address::ZERO);
            IERC721::getApprovedCall::abi_encode_returns(&(approved,))
        } else if selector == IERC721::isApprovedForAllCall::SELECTOR {
            let call: IERC721::isApprovedForAllCall = decode(data)?;
            let key = (to, call.owner, call.operator);
            let on = self.operators.get(&key).copied().unwrap_or(false);
            IERC721::isApprovedForAllCall::abi_encode_returns(&(on,))
        } else if selector == IERC165::supportsInterfaceCall::SELECTOR {
            let call: IERC165::supportsInterfaceCall = decode(data)?;
            let ifaces = self.interfaces.get(&to).ok_or_else(reverted)?;
            let supported = ifaces.contains(&call.interfaceId.0);
            IERC165::supportsInterfaceCall::abi_encode_returns(&(supported,))
        } else {
            return Err(reverted());
        };
        Ok(out.into())
    }

    fn apply(&mut self, from: Address, to: Address, data: &[u8]) -> Result<(), RpcError> {
        if self.broken.contains(&to) {
            return Err(reverted());
        }
        let selector = selector_of(data)?;

        if selector == IERC20::approveCall::SELECTOR {
            let call: IERC20::approveCall = decode(data)?;
            let (target, value) = (call.spender, call.amount);
            if self.is_nft(&to) {
                self.token_approvals.insert((to, value), target);
            } else {
                let key = (to, from, target);
                let current = self.allowances.get(&key).copied().unwrap_or_default();
                if self.strict_approve.contains(&to) && !current.is_zero() && !value.is_zero() {
                    return Err(reverted());
                }
                self.allowances.insert(key, value);
            }
            Ok(())
        } else if selector == IERC721::setApprovalForAllCall::SELECTOR {
            let call: IERC721::setApprovalForAllCall = decode(data)?;
            self.operators
                .insert((to, from, call.operator), call.approved);
            Ok(())
        } else {
            Err(reverted())
        }
    }
}

#[async_trait]
impl EvmClient for MockChain {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        Ok(self.with_state(|s| s.chain_id))
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(self.with_state(|s| s.head))
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>, RpcError> {
        Ok(self.with_state(|s| {
            (!s.missing_blocks && number <= s.head).then(|| 1_600_000_000 + number * s.block_time)
        }))
    }

    async fn get_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, RpcError> {
        self.with_state(|s| {
            s.get_logs_calls.push((from_block, to_block));
            if s.failing_log_calls > 0 {
                s.failing_log_calls -= 1;
                return Err(RpcError::Transport("connection reset".to_string()));
            }
            if let Some(max) = s.max_log_range {
                if to_block.saturating_sub(from_block) + 1 > max {
                    return Err(RpcError::Rpc {
                        code: -32062,
                        message: "block range is too large".to_string(),
                        data: None,
                    });
                }
            }
            Ok(s.logs
                .iter()
                .filter(|log| {
                    let block = log.block_number.unwrap_or_default();
                    block >= from_block
                        && block <= to_block
                        && filter.address.map_or(true, |a| a == log.address)
                        && filter.topics.iter().enumerate().all(|(i, t)| match t {
                            Some(topic) => log.topics.get(i) == Some(topic),
                            None => true,
                        })
                })
                .cloned()
                .collect())
        })
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        self.with_state(|s| s.view(to, &data))
    }

    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> Result<B256, RpcError> {
        self.with_state(|s| {
            let nonce = s.sent.len() as u64;
            let tx_hash = keccak256([from.as_slice(), &nonce.to_be_bytes()].concat());
            let reverts = s.reverting_txs.contains(&to);
            if !reverts {
                s.apply(from, to, &data)?;
            }
            s.sent.push((from, to, data));
            s.receipts.insert(tx_hash, !reverts);
            Ok(tx_hash)
        })
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, RpcError> {
        self.with_state(|s| {
            let success = *s
                .receipts
                .get(&tx_hash)
                .ok_or_else(|| RpcError::decode("unknown transaction"))?;
            Ok(TxReceipt {
                tx_hash,
                success,
                block_number: Some(s.head),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Log fixtures
// ---------------------------------------------------------------------------

fn fixture(contract: Address, topics: Vec<B256>, block: u64) -> Log {
    Log {
        address: contract,
        topics,
        data: Bytes::new(),
        block_number: Some(block),
    }
}

/// ERC-20 `Approval(owner, spender, value)`; value is unindexed.
pub fn erc20_approval_log(token: Address, owner: Address, spender: Address, block: u64) -> Log {
    fixture(
        token,
        vec![
            abi::approval_topic(),
            abi::address_topic(owner),
            abi::address_topic(spender),
        ],
        block,
    )
}

/// ERC-721 `Approval(owner, approved, tokenId)`; all indexed.
pub fn nft_approval_log(
    collection: Address,
    owner: Address,
    approved: Address,
    token_id: U256,
    block: u64,
) -> Log {
    fixture(
        collection,
        vec![
            abi::approval_topic(),
            abi::address_topic(owner),
            abi::address_topic(approved),
            B256::from(token_id.to_be_bytes::<32>()),
        ],
        block,
    )
}

/// `ApprovalForAll(owner, operator, approved)`.
pub fn approval_for_all_log(
    collection: Address,
    owner: Address,
    operator: Address,
    block: u64,
) -> Log {
    let mut log = fixture(
        collection,
        vec![
            abi::approval_for_all_topic(),
            abi::address_topic(owner),
            abi::address_topic(operator),
        ],
        block,
    );
    log.data = true.abi_encode().into();
    log
}

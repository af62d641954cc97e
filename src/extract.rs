//! Turn raw approval logs into candidate relationships.
//!
//! ERC-20 and ERC-721 share the `Approval(address,address,uint256)` topic;
//! they differ only in whether the third parameter is indexed. A log with
//! four topics is therefore a single-token NFT approval and a log with three
//! is a fungible allowance. `ApprovalForAll` has the same shape in ERC-721
//! and ERC-1155, so operator candidates are not split by standard here.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, U256};

use crate::abi::{approval_for_all_topic, approval_topic, topic_address, topic_uint};
use crate::rpc::Log;

/// A relationship discovered in a log, not yet checked against live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    TokenAllowance { token: Address, spender: Address },
    NftToken { contract: Address, token_id: U256 },
    Operator { contract: Address, operator: Address },
}

/// Classify one log by topic signature and topic count.
pub fn classify_log(log: &Log) -> Option<Candidate> {
    let topic0 = log.topics.first()?;
    if *topic0 == approval_topic() {
        match log.topics.len() {
            n if n >= 4 => Some(Candidate::NftToken {
                contract: log.address,
                token_id: topic_uint(&log.topics[3]),
            }),
            3 => Some(Candidate::TokenAllowance {
                token: log.address,
                spender: topic_address(&log.topics[2]),
            }),
            _ => None,
        }
    } else if *topic0 == approval_for_all_topic() && log.topics.len() >= 3 {
        Some(Candidate::Operator {
            contract: log.address,
            operator: topic_address(&log.topics[2]),
        })
    } else {
        None
    }
}

/// Deduplicated candidates grouped by contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    /// token -> spenders
    pub erc20: BTreeMap<Address, BTreeSet<Address>>,
    /// collection -> token ids
    pub erc721: BTreeMap<Address, BTreeSet<U256>>,
    /// collection -> operators
    pub operators: BTreeMap<Address, BTreeSet<Address>>,
}

impl Candidates {
    pub fn insert(&mut self, candidate: Candidate) {
        match candidate {
            Candidate::TokenAllowance { token, spender } => {
                self.erc20.entry(token).or_default().insert(spender);
            }
            Candidate::NftToken { contract, token_id } => {
                self.erc721.entry(contract).or_default().insert(token_id);
            }
            Candidate::Operator { contract, operator } => {
                self.operators.entry(contract).or_default().insert(operator);
            }
        }
    }

    /// Number of planned confirmation reads.
    pub fn total(&self) -> usize {
        self.erc20.values().map(BTreeSet::len).sum::<usize>()
            + self.erc721.values().map(BTreeSet::len).sum::<usize>()
            + self.operators.values().map(BTreeSet::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn has_erc20(&self, token: Address, spender: Address) -> bool {
        self.erc20.get(&token).is_some_and(|s| s.contains(&spender))
    }

    pub fn has_erc721(&self, contract: Address, token_id: U256) -> bool {
        self.erc721.get(&contract).is_some_and(|s| s.contains(&token_id))
    }

    pub fn has_operator(&self, contract: Address, operator: Address) -> bool {
        self.operators
            .get(&contract)
            .is_some_and(|s| s.contains(&operator))
    }
}

/// Accumulate every classifiable log; malformed entries are skipped.
pub fn extract<'a>(logs: impl IntoIterator<Item = &'a Log>) -> Candidates {
    let mut out = Candidates::default();
    extend(&mut out, logs);
    out
}

pub fn extend<'a>(candidates: &mut Candidates, logs: impl IntoIterator<Item = &'a Log>) {
    for candidate in logs.into_iter().filter_map(classify_log) {
        candidates.insert(candidate);
    }
}

//! Approve-then-act allowance handling and fee math for token tools.
//!
//! Tools that pull tokens from the owner (locker, bulk sender) first make
//! sure the spender's allowance covers the amount. Some ERC-20s refuse to
//! change a non-zero allowance to another non-zero value, so a failed
//! approval is retried as `approve(0)` followed by `approve(amount)`.

use alloy_primitives::{Address, B256, U256};

use crate::abi;
use crate::contract::{self, send_and_confirm};
use crate::error::TxError;
use crate::metrics;
use crate::rpc::EvmClient;

/// Which path [`ensure_allowance`] took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowanceAction {
    /// Current allowance already covers the amount; nothing sent.
    AlreadySufficient { current: U256 },
    /// A single `approve(spender, required)`.
    Approved { tx_hash: B256 },
    /// `approve(spender, 0)` then `approve(spender, required)`.
    ResetThenApproved { reset_tx: B256, tx_hash: B256 },
}

impl AllowanceAction {
    pub fn transactions(&self) -> usize {
        match self {
            Self::AlreadySufficient { .. } => 0,
            Self::Approved { .. } => 1,
            Self::ResetThenApproved { .. } => 2,
        }
    }
}

/// Make sure `spender` may pull at least `required` of `token` from `owner`.
pub async fn ensure_allowance<C: EvmClient + ?Sized>(
    client: &C,
    owner: Address,
    token: Address,
    spender: Address,
    required: U256,
) -> Result<AllowanceAction, TxError> {
    let current = contract::allowance(client, token, owner, spender).await?;
    if current >= required {
        tracing::debug!(%token, %spender, %current, %required, "allowance sufficient");
        return Ok(AllowanceAction::AlreadySufficient { current });
    }

    let first = send_and_confirm(client, owner, token, abi::approve(spender, required)).await;
    metrics::record_transaction("approve", first.is_ok());
    let err = match first {
        Ok(tx_hash) => return Ok(AllowanceAction::Approved { tx_hash }),
        Err(e) if e.is_user_rejected() => return Err(e.into()),
        Err(e) => e,
    };

    tracing::warn!(%token, %spender, error = %err, "approve failed, resetting allowance to zero first");
    let reset = send_and_confirm(client, owner, token, abi::approve(spender, U256::ZERO)).await;
    metrics::record_transaction("approve_reset", reset.is_ok());
    let reset_tx = reset?;

    let second = send_and_confirm(client, owner, token, abi::approve(spender, required)).await;
    metrics::record_transaction("approve", second.is_ok());
    let tx_hash = second?;

    Ok(AllowanceAction::ResetThenApproved { reset_tx, tx_hash })
}

// ---------------------------------------------------------------------------
// Fee math
// ---------------------------------------------------------------------------

/// How a raw on-chain fee value is scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeeUnit {
    /// Whole percent: 1 = 1%.
    Percent,
    /// Basis points: 100 = 1%.
    BasisPoints,
    /// Values above 100 are basis points, anything else whole percent.
    #[default]
    Auto,
}

impl FeeUnit {
    /// Resolve `Auto` against a raw fee value.
    pub fn resolve(self, raw_fee: u64) -> FeeUnit {
        match self {
            Self::Auto if raw_fee > 100 => Self::BasisPoints,
            Self::Auto => Self::Percent,
            unit => unit,
        }
    }

    fn denominator(self, raw_fee: u64) -> u64 {
        match self.resolve(raw_fee) {
            Self::BasisPoints => 10_000,
            _ => 100,
        }
    }
}

impl std::str::FromStr for FeeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "percent" | "pct" => Ok(Self::Percent),
            "bps" | "basis-points" => Ok(Self::BasisPoints),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown fee unit: {other}")),
        }
    }
}

/// Fee charged on `amount`, rounded down.
pub fn fee_amount(amount: U256, raw_fee: u64, unit: FeeUnit) -> U256 {
    let denom = U256::from(unit.denominator(raw_fee));
    amount.saturating_mul(U256::from(raw_fee)) / denom
}

/// Largest amount that, plus its fee, fits in `balance`.
pub fn max_with_fee(balance: U256, raw_fee: u64, unit: FeeUnit) -> U256 {
    let denom = unit.denominator(raw_fee);
    let total = U256::from(denom) + U256::from(raw_fee);
    balance.saturating_mul(U256::from(denom)) / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChain;

    fn owner() -> Address {
        Address::repeat_byte(0x0a)
    }

    #[test]
    fn test_fee_units() {
        let amount = U256::from(1_000_000u64);
        assert_eq!(fee_amount(amount, 1, FeeUnit::Auto), U256::from(10_000u64));
        assert_eq!(fee_amount(amount, 150, FeeUnit::Auto), U256::from(15_000u64));
        assert_eq!(fee_amount(amount, 150, FeeUnit::Percent), U256::from(1_500_000u64));
        assert_eq!(fee_amount(amount, 50, FeeUnit::BasisPoints), U256::from(5_000u64));
        assert_eq!(fee_amount(amount, 0, FeeUnit::Auto), U256::ZERO);
    }

    #[test]
    fn test_max_with_fee() {
        // 1% fee: 990 + 9.9 -> 990 fits in 1000 (rounded down)
        assert_eq!(max_with_fee(U256::from(1000u64), 1, FeeUnit::Percent), U256::from(990u64));
        assert_eq!(
            max_with_fee(U256::from(10_100u64), 100, FeeUnit::BasisPoints),
            U256::from(10_000u64)
        );
        assert_eq!(max_with_fee(U256::from(777u64), 0, FeeUnit::Auto), U256::from(777u64));
    }

    #[test]
    fn test_fee_unit_parse() {
        assert_eq!("bps".parse::<FeeUnit>().unwrap(), FeeUnit::BasisPoints);
        assert_eq!("Percent".parse::<FeeUnit>().unwrap(), FeeUnit::Percent);
        assert!("permille".parse::<FeeUnit>().is_err());
    }

    #[tokio::test]
    async fn test_sufficient_allowance_sends_nothing() {
        let chain = MockChain::new(1, 100, 12);
        let token = Address::repeat_byte(0xaa);
        let spender = Address::repeat_byte(0xbb);
        chain.set_allowance(token, owner(), spender, U256::from(500u64));

        let action = ensure_allowance(&chain, owner(), token, spender, U256::from(500u64))
            .await
            .unwrap();
        assert_eq!(action.transactions(), 0);
        assert!(chain.sent_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_plain_approve() {
        let chain = MockChain::new(1, 100, 12);
        let token = Address::repeat_byte(0xaa);
        let spender = Address::repeat_byte(0xbb);

        let action = ensure_allowance(&chain, owner(), token, spender, U256::from(500u64))
            .await
            .unwrap();
        assert!(matches!(action, AllowanceAction::Approved { .. }));
        assert_eq!(chain.allowance_of(token, owner(), spender), U256::from(500u64));
    }

    #[tokio::test]
    async fn test_reset_fallback_for_strict_tokens() {
        let chain = MockChain::new(1, 100, 12);
        let token = Address::repeat_byte(0xaa);
        let spender = Address::repeat_byte(0xbb);
        chain.require_zero_first(token);
        chain.set_allowance(token, owner(), spender, U256::from(100u64));

        let action = ensure_allowance(&chain, owner(), token, spender, U256::from(500u64))
            .await
            .unwrap();
        assert!(matches!(action, AllowanceAction::ResetThenApproved { .. }));
        assert_eq!(chain.allowance_of(token, owner(), spender), U256::from(500u64));
        // failed attempt is rejected at submission, so only two are recorded
        assert_eq!(chain.sent_transactions().len(), 2);
    }
}

//! Core data types for approval scanning.
//!
//! Defines the three confirmed-approval record kinds, their uniqueness keys,
//! allowance labelling and the block range type shared by the pipeline.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::units::format_units_trimmed;

/// Fractional digits kept in allowance labels.
pub const LABEL_FRACTION_DIGITS: usize = 6;

/// Symbol used when an ERC-20 `symbol()` read fails.
pub const DEFAULT_TOKEN_SYMBOL: &str = "TOKEN";
/// Symbol used when an ERC-721 `symbol()` read fails.
pub const DEFAULT_NFT_SYMBOL: &str = "NFT";

// ---------------------------------------------------------------------------
// Labels and classifications
// ---------------------------------------------------------------------------

/// Token standard of a collection holding an operator approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Standard {
    #[serde(rename = "ERC721")]
    Erc721,
    #[serde(rename = "ERC1155")]
    Erc1155,
    Unknown,
}

impl Standard {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Erc721 => "ERC721",
            Self::Erc1155 => "ERC1155",
            Self::Unknown => "Unknown",
        }
    }
}

/// Display form of an ERC-20 allowance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AllowanceLabel {
    Unlimited { text: String },
    Finite { text: String },
}

impl AllowanceLabel {
    /// Label a raw allowance. `U256::MAX` is "Unlimited"; anything else is
    /// scaled by `decimals`, or printed raw when decimals are unknown.
    pub fn from_amount(value: U256, decimals: Option<u8>) -> Self {
        if value == U256::MAX {
            return Self::Unlimited {
                text: "Unlimited".to_string(),
            };
        }
        let text = match decimals {
            Some(d) => format_units_trimmed(value, d, LABEL_FRACTION_DIGITS),
            None => value.to_string(),
        };
        Self::Finite { text }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Unlimited { text } | Self::Finite { text } => text,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited { .. })
    }
}

// ---------------------------------------------------------------------------
// Approval records
// ---------------------------------------------------------------------------

/// A live ERC-20 allowance. Unique per `(token, spender)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Erc20Approval {
    pub token: Address,
    pub symbol: String,
    pub decimals: Option<u8>,
    pub spender: Address,
    pub allowance: AllowanceLabel,
}

impl Erc20Approval {
    pub fn key(&self) -> (Address, Address) {
        (self.token, self.spender)
    }

    pub fn row_key(&self) -> String {
        format!("erc20:{}:{}", self.token, self.spender)
    }
}

/// A live single-token ERC-721 approval. Unique per `(contract, token_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Erc721TokenApproval {
    pub contract: Address,
    pub symbol: String,
    #[serde(with = "u256_decimal")]
    pub token_id: U256,
    pub approved: Address,
}

impl Erc721TokenApproval {
    pub fn key(&self) -> (Address, U256) {
        (self.contract, self.token_id)
    }

    pub fn row_key(&self) -> String {
        format!("erc721:{}:{}", self.contract, self.token_id)
    }
}

/// A live `setApprovalForAll` operator grant. Unique per `(contract, operator)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorApproval {
    pub contract: Address,
    pub standard: Standard,
    pub operator: Address,
    pub approved: bool,
}

impl OperatorApproval {
    pub fn key(&self) -> (Address, Address) {
        (self.contract, self.operator)
    }

    pub fn row_key(&self) -> String {
        format!("op:{}:{}", self.contract, self.operator)
    }
}

/// Approvals confirmed live by a single scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedApprovals {
    pub erc20: Vec<Erc20Approval>,
    pub erc721_tokens: Vec<Erc721TokenApproval>,
    pub operators: Vec<OperatorApproval>,
}

impl ConfirmedApprovals {
    pub fn len(&self) -> usize {
        self.erc20.len() + self.erc721_tokens.len() + self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unlimited_count(&self) -> usize {
        self.erc20.iter().filter(|a| a.allowance.is_unlimited()).count()
    }
}

// ---------------------------------------------------------------------------
// Block ranges
// ---------------------------------------------------------------------------

/// Inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Number of blocks covered; zero when `from > to`.
    pub fn len(&self) -> u64 {
        if self.from > self.to {
            0
        } else {
            self.to - self.from + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}–{}", self.from, self.to)
    }
}

/// Serialize token ids as decimal strings, the way explorers show them.
mod u256_decimal {
    use alloy_primitives::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse::<U256>().map_err(D::Error::custom)
    }
}

//! Error taxonomy for RPC access, scanning, persistence and revocation.
//!
//! Provider errors arrive in many shapes. [`classify`] maps them onto the
//! handful of classes the scanner reacts to, and [`failure_reason`] turns a
//! failed transaction into a short user-facing message.

use alloy_primitives::B256;
use thiserror::Error;

/// JSON-RPC code some providers use for an oversized `eth_getLogs` range.
pub const RANGE_TOO_LARGE_CODE: i64 = -32062;

/// Code wallets return when the user rejects a request (EIP-1193).
pub const USER_REJECTED_CODE: i64 = 4001;

/// Fallback message when no reason can be extracted from a failure.
pub const GENERIC_TX_FAILURE: &str = "Transaction failed.";

// ---------------------------------------------------------------------------
// RPC errors
// ---------------------------------------------------------------------------

/// Error returned by an [`crate::rpc::EvmClient`] call.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
    /// Non-success HTTP status from the endpoint.
    #[error("HTTP status {status}")]
    Http { status: u16 },
    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The request did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// A mined transaction ended with status 0.
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },
}

impl RpcError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// The wallet declined to sign.
    pub fn is_user_rejected(&self) -> bool {
        matches!(self, Self::Rpc { code, .. } if *code == USER_REJECTED_CODE)
    }
}

/// How the scanner should react to an [`RpcError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The provider rejected the block range; shrink the window.
    RangeTooLarge,
    /// Throttled by the provider; retry after a delay.
    RateLimited,
    /// Anything else worth retrying.
    Transient,
    /// The call executed and reverted; retrying will not help.
    Reverted,
}

const RANGE_TOO_LARGE_NEEDLES: &[&str] = &[
    "range too large",
    "block range is too large",
    "exceed maximum block range",
    "query returned more than",
    "block range too wide",
];

const RATE_LIMIT_NEEDLES: &[&str] = &[
    "rate limit",
    "too many requests",
    "compute units per second",
];

/// Classify a provider error into the reaction the scanner should take.
pub fn classify(err: &RpcError) -> ErrorClass {
    match err {
        RpcError::Rpc { code, message, .. } => {
            let msg = message.to_ascii_lowercase();
            if *code == RANGE_TOO_LARGE_CODE || contains_any(&msg, RANGE_TOO_LARGE_NEEDLES) {
                ErrorClass::RangeTooLarge
            } else if *code == 429 || contains_any(&msg, RATE_LIMIT_NEEDLES) {
                ErrorClass::RateLimited
            } else if msg.contains("execution reverted") {
                ErrorClass::Reverted
            } else {
                ErrorClass::Transient
            }
        }
        RpcError::Http { status: 429 } => ErrorClass::RateLimited,
        RpcError::Reverted { .. } => ErrorClass::Reverted,
        RpcError::Http { .. }
        | RpcError::Transport(_)
        | RpcError::Timeout(_)
        | RpcError::Decode(_) => ErrorClass::Transient,
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

// ---------------------------------------------------------------------------
// Transaction failure reasons
// ---------------------------------------------------------------------------

/// Known shapes a failed transaction's error can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureShape {
    /// A concise provider/library summary (`shortMessage`).
    ShortMessage(String),
    /// A decoded revert reason.
    Reason(String),
    /// The raw error message.
    Message(String),
    /// Nothing usable.
    Unrecognized,
}

impl FailureShape {
    /// Inspect an error and pick the most specific shape it carries.
    pub fn of(err: &RpcError) -> Self {
        match err {
            RpcError::Rpc { code, .. } if *code == USER_REJECTED_CODE => {
                Self::ShortMessage("User rejected the request.".to_string())
            }
            RpcError::Rpc { message, data, .. } => {
                if let Some(shape) = data.as_ref().and_then(shape_from_data) {
                    return shape;
                }
                if let Some(reason) = revert_reason(message) {
                    return Self::Reason(reason);
                }
                non_empty(message).map_or(Self::Unrecognized, Self::Message)
            }
            RpcError::Reverted { .. } => Self::Reason("transaction reverted".to_string()),
            RpcError::Transport(msg) | RpcError::Timeout(msg) => {
                non_empty(msg).map_or(Self::Unrecognized, Self::Message)
            }
            RpcError::Http { .. } | RpcError::Decode(_) => Self::Unrecognized,
        }
    }

    pub fn into_message(self) -> String {
        match self {
            Self::ShortMessage(s) | Self::Reason(s) | Self::Message(s) => s,
            Self::Unrecognized => GENERIC_TX_FAILURE.to_string(),
        }
    }
}

fn shape_from_data(data: &serde_json::Value) -> Option<FailureShape> {
    let field = |name: &str| data.get(name).and_then(|v| v.as_str()).and_then(non_empty);
    if let Some(s) = field("shortMessage") {
        return Some(FailureShape::ShortMessage(s));
    }
    if let Some(s) = field("reason") {
        return Some(FailureShape::Reason(s));
    }
    if let Some(s) = field("message") {
        return Some(FailureShape::Message(s));
    }
    if let Some(s) = data.as_str().and_then(non_empty) {
        if !s.starts_with("0x") {
            return Some(FailureShape::Message(s));
        }
    }
    None
}

fn revert_reason(message: &str) -> Option<String> {
    let (_, reason) = message.split_once("execution reverted:")?;
    non_empty(reason.trim())
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Best-effort human-readable reason for a failed transaction.
pub fn failure_reason(err: &RpcError) -> String {
    FailureShape::of(err).into_message()
}

// ---------------------------------------------------------------------------
// Pipeline errors
// ---------------------------------------------------------------------------

/// Error from the local key-value store backing the scan cache.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache record encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error that ends a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The scan was cancelled; not a failure.
    #[error("scan cancelled")]
    Aborted,
    #[error("no account to scan")]
    NoAccount,
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ScanError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Error from a revoke or approve action.
#[derive(Debug, Error)]
pub enum TxError {
    /// Another row is already being revoked.
    #[error("another revoke is in progress ({0})")]
    Busy(String),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TxError {
    /// Message suitable for showing to the user.
    pub fn reason(&self) -> String {
        match self {
            Self::Rpc(e) => failure_reason(e),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rpc(code: i64, message: &str) -> RpcError {
        RpcError::Rpc {
            code,
            message: message.to_string(),
            data: None,
        }
    }

    #[test]
    fn test_classify_range_too_large() {
        assert_eq!(classify(&rpc(-32062, "whatever")), ErrorClass::RangeTooLarge);
        assert_eq!(
            classify(&rpc(-32000, "Block range is too large")),
            ErrorClass::RangeTooLarge
        );
        assert_eq!(
            classify(&rpc(-32005, "query returned more than 10000 results")),
            ErrorClass::RangeTooLarge
        );
    }

    #[test]
    fn test_classify_other_classes() {
        assert_eq!(classify(&rpc(-32005, "rate limit exceeded")), ErrorClass::RateLimited);
        assert_eq!(classify(&RpcError::Http { status: 429 }), ErrorClass::RateLimited);
        assert_eq!(
            classify(&rpc(-32000, "header not found for block 14290001")),
            ErrorClass::Transient
        );
        assert_eq!(classify(&RpcError::Http { status: 502 }), ErrorClass::Transient);
        assert_eq!(
            classify(&RpcError::Transport("connection reset".into())),
            ErrorClass::Transient
        );
        assert_eq!(classify(&rpc(3, "execution reverted")), ErrorClass::Reverted);
    }

    #[test]
    fn test_failure_reason_preference_order() {
        let err = RpcError::Rpc {
            code: -32000,
            message: "raw".into(),
            data: Some(json!({"shortMessage": "short", "reason": "why", "message": "long"})),
        };
        assert_eq!(failure_reason(&err), "short");

        let err = RpcError::Rpc {
            code: -32000,
            message: "raw".into(),
            data: Some(json!({"reason": "why", "message": "long"})),
        };
        assert_eq!(failure_reason(&err), "why");

        let err = RpcError::Rpc {
            code: -32000,
            message: "raw".into(),
            data: Some(json!({"message": "long"})),
        };
        assert_eq!(failure_reason(&err), "long");
    }

    #[test]
    fn test_failure_reason_from_message() {
        assert_eq!(
            failure_reason(&rpc(3, "execution reverted: ERC20: insufficient allowance")),
            "ERC20: insufficient allowance"
        );
        assert_eq!(failure_reason(&rpc(-32000, "nonce too low")), "nonce too low");
        assert_eq!(failure_reason(&rpc(4001, "User denied")), "User rejected the request.");
    }

    #[test]
    fn test_failure_reason_fallback() {
        assert_eq!(failure_reason(&rpc(-32000, "   ")), GENERIC_TX_FAILURE);
        assert_eq!(failure_reason(&RpcError::decode("bad json")), GENERIC_TX_FAILURE);
        assert_eq!(failure_reason(&RpcError::Http { status: 500 }), GENERIC_TX_FAILURE);
    }
}

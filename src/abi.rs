//! ERC-20 / ERC-721 / ERC-165 bindings for the surface the scanner touches:
//! two event topics, a handful of view calls, and the revoke transactions.

use alloy_primitives::{Address, Bytes, FixedBytes, B256, U256};
use alloy_sol_types::{sol, SolCall, SolEvent};

use crate::error::RpcError;

sol! {
    interface IERC20 {
        event Approval(address indexed owner, address indexed spender, uint256 value);

        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }

    interface IERC721 {
        event Approval(address indexed owner, address indexed approved, uint256 indexed tokenId);
        event ApprovalForAll(address indexed owner, address indexed operator, bool approved);

        function approve(address to, uint256 tokenId) external;
        function getApproved(uint256 tokenId) external view returns (address);
        function isApprovedForAll(address owner, address operator) external view returns (bool);
        function setApprovalForAll(address operator, bool approved) external;
    }

    interface IERC165 {
        function supportsInterface(bytes4 interfaceId) external view returns (bool);
    }
}

/// ERC-165 interface id of ERC-721.
pub const IFACE_ERC721: [u8; 4] = [0x80, 0xac, 0x58, 0xcd];
/// ERC-165 interface id of ERC-1155.
pub const IFACE_ERC1155: [u8; 4] = [0xd9, 0xb6, 0x7a, 0x26];

/// topic0 shared by ERC-20 and ERC-721 `Approval` events.
pub fn approval_topic() -> B256 {
    IERC20::Approval::SIGNATURE_HASH
}

/// topic0 shared by ERC-721 and ERC-1155 `ApprovalForAll` events.
pub fn approval_for_all_topic() -> B256 {
    IERC721::ApprovalForAll::SIGNATURE_HASH
}

/// Left-pad an address into an indexed-topic value.
pub fn address_topic(addr: Address) -> B256 {
    addr.into_word()
}

/// Recover an address from the low 20 bytes of a topic.
pub fn topic_address(topic: &B256) -> Address {
    Address::from_word(*topic)
}

pub fn topic_uint(topic: &B256) -> U256 {
    U256::from_be_bytes(topic.0)
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

pub(crate) fn decode_err(e: alloy_sol_types::Error) -> RpcError {
    RpcError::decode(format!("abi decode: {e}"))
}

/// ERC-20 `approve(spender, amount)`.
pub fn approve(spender: Address, amount: U256) -> Bytes {
    IERC20::approveCall { spender, amount }.abi_encode().into()
}

pub fn set_approval_for_all(operator: Address, approved: bool) -> Bytes {
    IERC721::setApprovalForAllCall { operator, approved }
        .abi_encode()
        .into()
}

pub fn supports_interface(interface_id: [u8; 4]) -> Bytes {
    IERC165::supportsInterfaceCall {
        interfaceId: FixedBytes(interface_id),
    }
    .abi_encode()
    .into()
}

/// Decode a `symbol()` return, accepting the `bytes32` form some older
/// tokens use.
pub fn decode_symbol(data: &[u8]) -> Result<String, RpcError> {
    if data.len() == 32 {
        let end = data.iter().position(|b| *b == 0).unwrap_or(32);
        return String::from_utf8(data[..end].to_vec())
            .map_err(|e| RpcError::decode(format!("invalid bytes32 symbol: {e}")));
    }
    IERC20::symbolCall::abi_decode_returns(data, true)
        .map(|r| r._0)
        .map_err(decode_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        assert_eq!(hex::encode(IERC20::approveCall::SELECTOR), "095ea7b3");
        assert_eq!(hex::encode(IERC20::allowanceCall::SELECTOR), "dd62ed3e");
        assert_eq!(hex::encode(IERC721::setApprovalForAllCall::SELECTOR), "a22cb465");
        assert_eq!(hex::encode(IERC165::supportsInterfaceCall::SELECTOR), "01ffc9a7");
        assert_eq!(IERC20::approveCall::SELECTOR, IERC721::approveCall::SELECTOR);
    }

    #[test]
    fn test_known_topics() {
        assert_eq!(
            hex::encode(approval_topic()),
            "8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925"
        );
        assert_eq!(approval_topic(), IERC721::Approval::SIGNATURE_HASH);
        assert_eq!(
            hex::encode(approval_for_all_topic()),
            "17307eab39ab6107e8899845ad3d59bd9653f200f220920489ca2b5937696c31"
        );
    }

    #[test]
    fn test_address_topic_padding() {
        let addr = Address::repeat_byte(0x12);
        let topic = address_topic(addr);
        assert_eq!(&topic[..12], &[0u8; 12]);
        assert_eq!(topic_address(&topic), addr);
    }

    #[test]
    fn test_encode_approve_layout() {
        let spender = Address::repeat_byte(0xbb);
        let data = approve(spender, U256::ZERO);
        assert_eq!(data.len(), 4 + 64);
        let call = IERC20::approveCall::abi_decode(&data, true).unwrap();
        assert_eq!(call.spender, spender);
        assert_eq!(call.amount, U256::ZERO);
    }

    #[test]
    fn test_decode_symbol_forms() {
        let encoded = IERC20::symbolCall::abi_encode_returns(&("USDC".to_string(),));
        assert_eq!(decode_symbol(&encoded).unwrap(), "USDC");

        let mut bytes32 = [0u8; 32];
        bytes32[..3].copy_from_slice(b"MKR");
        assert_eq!(decode_symbol(&bytes32).unwrap(), "MKR");

        assert!(decode_symbol(&[0u8; 10]).is_err());
    }
}

//! Typed contract reads and transaction submission on top of [`EvmClient`].

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;

use crate::abi::{self, decode_err, IERC165, IERC20, IERC721, IFACE_ERC1155, IFACE_ERC721};
use crate::approval::Standard;
use crate::error::RpcError;
use crate::rpc::EvmClient;

/// `eth_call` a view and decode its return with the call's ABI.
async fn view<C: EvmClient + ?Sized, T: SolCall>(
    client: &C,
    to: Address,
    call: T,
) -> Result<T::Return, RpcError> {
    let out = client.call(to, call.abi_encode().into()).await?;
    T::abi_decode_returns(&out, true).map_err(decode_err)
}

pub async fn allowance<C: EvmClient + ?Sized>(
    client: &C,
    token: Address,
    owner: Address,
    spender: Address,
) -> Result<U256, RpcError> {
    let ret = view(client, token, IERC20::allowanceCall { owner, spender }).await?;
    Ok(ret._0)
}

pub async fn symbol<C: EvmClient + ?Sized>(client: &C, token: Address) -> Result<String, RpcError> {
    let out = client
        .call(token, IERC20::symbolCall {}.abi_encode().into())
        .await?;
    abi::decode_symbol(&out)
}

pub async fn decimals<C: EvmClient + ?Sized>(client: &C, token: Address) -> Result<u8, RpcError> {
    Ok(view(client, token, IERC20::decimalsCall {}).await?._0)
}

pub async fn get_approved<C: EvmClient + ?Sized>(
    client: &C,
    collection: Address,
    token_id: U256,
) -> Result<Address, RpcError> {
    let ret = view(client, collection, IERC721::getApprovedCall { tokenId: token_id }).await?;
    Ok(ret._0)
}

pub async fn is_approved_for_all<C: EvmClient + ?Sized>(
    client: &C,
    collection: Address,
    owner: Address,
    operator: Address,
) -> Result<bool, RpcError> {
    let call = IERC721::isApprovedForAllCall { owner, operator };
    Ok(view(client, collection, call).await?._0)
}

pub async fn supports_interface<C: EvmClient + ?Sized>(
    client: &C,
    contract: Address,
    interface_id: [u8; 4],
) -> Result<bool, RpcError> {
    let out = client
        .call(contract, abi::supports_interface(interface_id))
        .await?;
    IERC165::supportsInterfaceCall::abi_decode_returns(&out, true)
        .map(|r| r._0)
        .map_err(decode_err)
}

/// Probe ERC-165 for ERC-721, then ERC-1155. Failed probes count as "no".
pub async fn probe_standard<C: EvmClient + ?Sized>(client: &C, contract: Address) -> Standard {
    if let Ok(true) = supports_interface(client, contract, IFACE_ERC721).await {
        return Standard::Erc721;
    }
    if let Ok(true) = supports_interface(client, contract, IFACE_ERC1155).await {
        return Standard::Erc1155;
    }
    Standard::Unknown
}

/// Submit a transaction and wait for it to be mined successfully.
pub async fn send_and_confirm<C: EvmClient + ?Sized>(
    client: &C,
    from: Address,
    to: Address,
    data: Bytes,
) -> Result<B256, RpcError> {
    let tx_hash = client.send_transaction(from, to, data).await?;
    tracing::info!(%tx_hash, %to, "transaction submitted");
    let receipt = client.wait_for_receipt(tx_hash).await?;
    if !receipt.success {
        return Err(RpcError::Reverted { tx_hash });
    }
    tracing::info!(%tx_hash, block = ?receipt.block_number, "transaction confirmed");
    Ok(tx_hash)
}

//! EVM JSON-RPC access.
//!
//! [`EvmClient`] is the provider boundary the pipeline is written against.
//! [`HttpClient`] implements it with raw JSON-RPC calls over HTTP.

use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;

use crate::error::RpcError;
use crate::metrics;

/// Default interval between `eth_getTransactionReceipt` polls.
pub const DEFAULT_RECEIPT_POLL: Duration = Duration::from_millis(1500);

/// Log filter without a block range; the fetcher supplies the range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    /// Restrict to a single emitting contract.
    pub address: Option<Address>,
    /// Positional topics; `None` matches anything.
    pub topics: Vec<Option<B256>>,
}

impl LogFilter {
    pub fn with_topics(topics: Vec<Option<B256>>) -> Self {
        Self {
            address: None,
            topics,
        }
    }
}

/// An event log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub success: bool,
    pub block_number: Option<u64>,
}

/// Minimal EVM provider surface used by the scanner and revoke flows.
#[async_trait]
pub trait EvmClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, RpcError>;

    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Timestamp of block `number`, or `None` if the node does not know it.
    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>, RpcError>;

    async fn get_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, RpcError>;

    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError>;

    /// Submit a transaction signed by the node/wallet behind the endpoint.
    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> Result<B256, RpcError>;

    /// Block until the transaction is mined.
    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, RpcError>;
}

#[async_trait]
impl<T: EvmClient + ?Sized> EvmClient for Arc<T> {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        (**self).chain_id().await
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        (**self).block_number().await
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>, RpcError> {
        (**self).block_timestamp(number).await
    }

    async fn get_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, RpcError> {
        (**self).get_logs(filter, from_block, to_block).await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        (**self).call(to, data).await
    }

    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> Result<B256, RpcError> {
        (**self).send_transaction(from, to, data).await
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, RpcError> {
        (**self).wait_for_receipt(tx_hash).await
    }
}

// ---------------------------------------------------------------------------
// HTTP JSON-RPC client
// ---------------------------------------------------------------------------

/// JSON-RPC client for an EVM node over HTTP.
pub struct HttpClient {
    rpc_url: String,
    client: reqwest::Client,
    receipt_poll: Duration,
}

impl HttpClient {
    /// Create a new client for the given RPC URL.
    pub fn new(rpc_url: &str) -> Self {
        Self {
            rpc_url: rpc_url.to_string(),
            client: reqwest::Client::new(),
            receipt_poll: DEFAULT_RECEIPT_POLL,
        }
    }

    pub fn with_receipt_poll(mut self, interval: Duration) -> Self {
        self.receipt_poll = interval;
        self
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Make a JSON-RPC call and record it.
    async fn rpc_call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let started = Instant::now();
        let result = self.rpc_call_inner(method, params).await;
        metrics::record_rpc_call(method, result.is_ok(), started.elapsed().as_millis() as u64);
        if let Err(ref e) = result {
            tracing::debug!(method, error = %e, "RPC call failed");
        }
        result
    }

    async fn rpc_call_inner(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });

        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RpcError::Http {
                status: status.as_u16(),
            });
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RpcError::decode(format!("failed to parse RPC response: {e}")))?;

        if let Some(error) = json.get("error") {
            return Err(RpcError::Rpc {
                code: error.get("code").and_then(|c| c.as_i64()).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string(),
                data: error.get("data").cloned(),
            });
        }

        json.get("result")
            .cloned()
            .ok_or_else(|| RpcError::decode("missing result in RPC response"))
    }
}

fn transport_error(e: reqwest::Error) -> RpcError {
    if e.is_timeout() {
        RpcError::Timeout(e.to_string())
    } else {
        RpcError::Transport(e.to_string())
    }
}

#[async_trait]
impl EvmClient for HttpClient {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        let resp = self.rpc_call("eth_chainId", serde_json::json!([])).await?;
        quantity(&resp)
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        let resp = self.rpc_call("eth_blockNumber", serde_json::json!([])).await?;
        quantity(&resp)
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<u64>, RpcError> {
        let resp = self
            .rpc_call(
                "eth_getBlockByNumber",
                serde_json::json!([block_tag(number), false]),
            )
            .await?;
        if resp.is_null() {
            return Ok(None);
        }
        let ts = resp
            .get("timestamp")
            .ok_or_else(|| RpcError::decode("missing timestamp in block response"))?;
        quantity(ts).map(Some)
    }

    async fn get_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, RpcError> {
        let topics: Vec<serde_json::Value> = filter
            .topics
            .iter()
            .map(|t| match t {
                Some(topic) => serde_json::Value::String(format!("{topic:?}")),
                None => serde_json::Value::Null,
            })
            .collect();

        let mut params = serde_json::json!({
            "fromBlock": block_tag(from_block),
            "toBlock": block_tag(to_block),
            "topics": topics,
        });
        if let Some(address) = filter.address {
            params["address"] = serde_json::Value::String(format!("{address:?}"));
        }

        let result = self
            .rpc_call("eth_getLogs", serde_json::json!([params]))
            .await?;
        let entries = result
            .as_array()
            .ok_or_else(|| RpcError::decode("expected array of logs"))?;

        Ok(entries.iter().filter_map(parse_log).collect())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let tx = serde_json::json!({
            "to": format!("{to:?}"),
            "data": hex_data(&data),
        });
        let resp = self
            .rpc_call("eth_call", serde_json::json!([tx, "latest"]))
            .await?;
        let raw = resp
            .as_str()
            .ok_or_else(|| RpcError::decode("eth_call result is not a string"))?;
        parse_bytes(raw)
    }

    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> Result<B256, RpcError> {
        let tx = serde_json::json!({
            "from": format!("{from:?}"),
            "to": format!("{to:?}"),
            "data": hex_data(&data),
        });
        let resp = self
            .rpc_call("eth_sendTransaction", serde_json::json!([tx]))
            .await?;
        resp.as_str()
            .and_then(|s| s.parse::<B256>().ok())
            .ok_or_else(|| RpcError::decode("invalid transaction hash"))
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, RpcError> {
        loop {
            let resp = self
                .rpc_call(
                    "eth_getTransactionReceipt",
                    serde_json::json!([format!("{tx_hash:?}")]),
                )
                .await?;
            if !resp.is_null() {
                return parse_receipt(tx_hash, &resp);
            }
            tracing::debug!(%tx_hash, "receipt not available yet");
            tokio::time::sleep(self.receipt_poll).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

fn block_tag(block_number: u64) -> String {
    format!("0x{block_number:x}")
}

fn hex_data(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

fn quantity(v: &serde_json::Value) -> Result<u64, RpcError> {
    let s = v
        .as_str()
        .ok_or_else(|| RpcError::decode(format!("expected hex quantity, got {v}")))?;
    parse_hex_u64(s)
}

/// Parse a 0x-prefixed hex quantity as u64.
pub fn parse_hex_u64(hex: &str) -> Result<u64, RpcError> {
    let clean = hex.trim_start_matches("0x");
    if clean.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(clean, 16)
        .map_err(|_| RpcError::decode(format!("invalid hex quantity: {hex}")))
}

fn parse_bytes(raw: &str) -> Result<Bytes, RpcError> {
    let clean = raw.trim_start_matches("0x");
    hex::decode(clean)
        .map(Bytes::from)
        .map_err(|e| RpcError::decode(format!("invalid hex data: {e}")))
}

/// Parse an `eth_getLogs` entry; malformed entries yield `None`.
fn parse_log(log: &serde_json::Value) -> Option<Log> {
    let address = log.get("address")?.as_str()?.parse::<Address>().ok()?;
    let topics = log
        .get("topics")?
        .as_array()?
        .iter()
        .map(|t| t.as_str().and_then(|s| s.parse::<B256>().ok()))
        .collect::<Option<Vec<_>>>()?;
    let data = log
        .get("data")
        .and_then(|d| d.as_str())
        .and_then(|d| parse_bytes(d).ok())
        .unwrap_or_default();
    let block_number = log
        .get("blockNumber")
        .and_then(|b| b.as_str())
        .and_then(|b| parse_hex_u64(b).ok());

    Some(Log {
        address,
        topics,
        data,
        block_number,
    })
}

fn parse_receipt(tx_hash: B256, resp: &serde_json::Value) -> Result<TxReceipt, RpcError> {
    let status = resp
        .get("status")
        .ok_or_else(|| RpcError::decode("missing status in receipt"))?;
    let block_number = resp.get("blockNumber").and_then(|b| quantity(b).ok());
    Ok(TxReceipt {
        tx_hash,
        success: quantity(status)? == 1,
        block_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn rpc_result(result: serde_json::Value) -> serde_json::Value {
        serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": result})
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex_u64("0x1").unwrap(), 1);
        assert_eq!(parse_hex_u64("0xff").unwrap(), 255);
        assert_eq!(parse_hex_u64("0x100").unwrap(), 256);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn test_parse_log_skips_malformed() {
        let good = serde_json::json!({
            "address": "0x1234567890abcdef1234567890abcdef12345678",
            "topics": [
                "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925",
                "0x0000000000000000000000001111111111111111111111111111111111111111"
            ],
            "data": "0x",
            "blockNumber": "0x10"
        });
        let log = parse_log(&good).unwrap();
        assert_eq!(log.topics.len(), 2);
        assert_eq!(log.block_number, Some(16));

        let bad = serde_json::json!({"address": "nope", "topics": []});
        assert!(parse_log(&bad).is_none());
    }

    #[tokio::test]
    async fn test_block_number() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/").body_contains("eth_blockNumber");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(rpc_result(serde_json::json!("0x4b7")));
        });

        let client = HttpClient::new(&server.base_url());
        assert_eq!(client.block_number().await.unwrap(), 1207);
    }

    #[tokio::test]
    async fn test_rpc_error_is_typed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": {"code": -32062, "message": "block range is too large"}
                }));
        });

        let client = HttpClient::new(&server.base_url());
        let err = client
            .get_logs(&LogFilter::default(), 0, 100_000)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Rpc { code: -32062, .. }));
    }

    #[tokio::test]
    async fn test_http_status_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(429);
        });

        let client = HttpClient::new(&server.base_url());
        let err = client.chain_id().await.unwrap_err();
        assert!(matches!(err, RpcError::Http { status: 429 }));
    }

    #[tokio::test]
    async fn test_unknown_block_is_none() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/").body_contains("eth_getBlockByNumber");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(rpc_result(serde_json::Value::Null));
        });

        let client = HttpClient::new(&server.base_url());
        assert_eq!(client.block_timestamp(99).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_receipt_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/").body_contains("eth_getTransactionReceipt");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(rpc_result(serde_json::json!({
                    "status": "0x0",
                    "blockNumber": "0x20"
                })));
        });

        let client = HttpClient::new(&server.base_url());
        let receipt = client.wait_for_receipt(B256::repeat_byte(0xab)).await.unwrap();
        assert!(!receipt.success);
        assert_eq!(receipt.block_number, Some(32));
    }
}

//! JSON-RPC chain client
//!
//! Talks the Ethereum JSON-RPC dialect over HTTP. Transactions are sent
//! with `eth_sendTransaction`, so the node (or a signing proxy in front of
//! it) holds the unlocked accounts.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{
    parse_quantity, to_quantity, ChainClient, ChainError, TransactionReceipt, TransactionRequest,
};

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// HTTP JSON-RPC client
pub struct RpcClient {
    client: Client,
    url: String,
    poll_interval: Duration,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a new client with a per-request timeout
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ChainError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            poll_interval: Duration::from_millis(500),
            next_id: AtomicU64::new(1),
        })
    }

    /// Interval between receipt polls
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("RPC {} #{} -> {}", method, id, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&RpcRequest {
                jsonrpc: "2.0",
                id,
                method,
                params,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChainError::RequestFailed(format!("{method} timed out"))
                } else if e.is_connect() {
                    ChainError::RequestFailed(format!("connection refused to {}", self.url))
                } else {
                    ChainError::RequestFailed(e.to_string())
                }
            })?;

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(body.result.unwrap_or(Value::Null))
    }

    async fn call_quantity(&self, method: &str, params: Value) -> Result<u128, ChainError> {
        let result = self.call(method, params).await?;
        let text = result
            .as_str()
            .ok_or_else(|| ChainError::InvalidResponse(format!("{method} returned {result}")))?;
        parse_quantity(text)
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>, ChainError> {
        let result = self.call("eth_getTransactionReceipt", json!([tx_hash])).await?;
        if result.is_null() {
            return Ok(None);
        }
        parse_receipt(tx_hash, &result).map(Some)
    }

    async fn poll_receipt(&self, tx_hash: &str) -> Result<TransactionReceipt, ChainError> {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            if let Some(receipt) = self.receipt(tx_hash).await? {
                return Ok(receipt);
            }
        }
    }
}

fn parse_receipt(tx_hash: &str, value: &Value) -> Result<TransactionReceipt, ChainError> {
    let field = |name: &str| value.get(name).and_then(Value::as_str);

    let block_number = field("blockNumber")
        .map(parse_quantity)
        .transpose()?
        .unwrap_or(0) as u64;
    // Pre-Byzantium receipts carry no status
    let success = field("status").map(parse_quantity).transpose()?.unwrap_or(1) == 1;

    Ok(TransactionReceipt {
        transaction_hash: field("transactionHash").unwrap_or(tx_hash).to_string(),
        block_number,
        success,
        contract_address: field("contractAddress").map(str::to_string),
    })
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.call_quantity("eth_blockNumber", json!([])).await? as u64)
    }

    async fn get_balance(&self, address: &str) -> Result<u128, ChainError> {
        self.call_quantity("eth_getBalance", json!([address, "latest"]))
            .await
    }

    async fn get_transaction_count(&self, address: &str) -> Result<u64, ChainError> {
        Ok(self
            .call_quantity("eth_getTransactionCount", json!([address, "pending"]))
            .await? as u64)
    }

    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<String, ChainError> {
        let mut params = json!({
            "from": tx.from,
            "value": to_quantity(tx.value),
        });
        if let Some(to) = &tx.to {
            params["to"] = json!(to);
        }
        if let Some(data) = &tx.data {
            params["data"] = json!(data);
        }
        if let Some(gas) = tx.gas {
            params["gas"] = json!(to_quantity(gas as u128));
        }

        let result = self.call("eth_sendTransaction", json!([params])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChainError::InvalidResponse(format!("eth_sendTransaction returned {result}")))
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> Result<TransactionReceipt, ChainError> {
        match tokio::time::timeout(timeout, self.poll_receipt(tx_hash)).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::ConfirmationTimeout(
                tx_hash.to_string(),
                timeout.as_millis() as u64,
            )),
        }
    }
}

//! Blockchain client boundary
//!
//! The scheduler only needs balance and nonce queries, transaction
//! submission and confirmation. `RpcClient` talks JSON-RPC to a node;
//! `MemoryChain` is an in-process stand-in for dry runs and tests.

mod memory;
mod rpc;

pub use memory::MemoryChain;
pub use rpc::RpcClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::signer::Signer;

/// Chain client errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("RPC request failed: {0}")]
    RequestFailed(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("Transaction {0} not confirmed after {1}ms")]
    ConfirmationTimeout(String, u64),

    #[error("Transaction {0} reverted")]
    Reverted(String),

    #[error("Insufficient funds for {0}")]
    InsufficientFunds(String),
}

/// Transaction to submit from a leased signer
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub from: String,
    pub to: Option<String>,
    #[serde(default)]
    pub value: u128,
    pub data: Option<String>,
    pub gas: Option<u64>,
}

impl TransactionRequest {
    pub fn transfer(from: &Signer, to: impl Into<String>, value: u128) -> Self {
        Self {
            from: from.address.clone(),
            to: Some(to.into()),
            value,
            ..Default::default()
        }
    }

    pub fn deploy(from: &Signer, bytecode: impl Into<String>) -> Self {
        Self {
            from: from.address.clone(),
            data: Some(bytecode.into()),
            ..Default::default()
        }
    }
}

/// Confirmed transaction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub success: bool,
    pub contract_address: Option<String>,
}

/// Handle to a deployed contract
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractHandle {
    pub name: String,
    pub address: String,
    pub transaction_hash: String,
}

/// Operations the scheduler and built-in handlers need from a chain
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainError>;

    async fn get_balance(&self, address: &str) -> Result<u128, ChainError>;

    async fn get_transaction_count(&self, address: &str) -> Result<u64, ChainError>;

    /// Submit a transaction; signing is the node's or wallet's concern
    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<String, ChainError>;

    async fn wait_for_confirmation(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> Result<TransactionReceipt, ChainError>;
}

pub type SharedChain = Arc<dyn ChainClient>;

/// Deploy contract bytecode from a signer and wait for its address
pub async fn deploy_contract(
    chain: &dyn ChainClient,
    signer: &Signer,
    name: &str,
    bytecode: &str,
    timeout: Duration,
) -> Result<ContractHandle, ChainError> {
    let tx_hash = chain
        .send_transaction(&TransactionRequest::deploy(signer, bytecode))
        .await?;
    let receipt = chain.wait_for_confirmation(&tx_hash, timeout).await?;

    if !receipt.success {
        return Err(ChainError::Reverted(tx_hash));
    }

    let address = receipt
        .contract_address
        .ok_or_else(|| ChainError::InvalidResponse(format!("no contract address in {tx_hash}")))?;

    info!("Deployed {} at {}", name, address);

    Ok(ContractHandle {
        name: name.to_string(),
        address,
        transaction_hash: tx_hash,
    })
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(value: &str) -> Result<u128, ChainError> {
    let hex = value
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::InvalidResponse(format!("not a hex quantity: {value}")))?;
    if hex.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(hex, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("bad quantity {value}: {e}")))
}

pub fn to_quantity(value: u128) -> String {
    format!("0x{value:x}")
}

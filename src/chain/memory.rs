//! In-memory chain
//!
//! Instant-mining ledger used for dry runs (`rpc_url: memory`) and tests.
//! Every call yields to the runtime so concurrent scenarios interleave
//! the same way they do against a real node.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use super::{ChainClient, ChainError, TransactionReceipt, TransactionRequest};

#[derive(Debug, Default)]
struct Ledger {
    mined: u64,
    tx_counter: u64,
    balances: HashMap<String, u128>,
    nonces: HashMap<String, u64>,
    receipts: HashMap<String, TransactionReceipt>,
}

/// In-process chain with one block per transaction
#[derive(Debug)]
pub struct MemoryChain {
    ledger: Mutex<Ledger>,
    latency: Duration,
    block_time: Option<Duration>,
    started: Instant,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            latency: Duration::ZERO,
            block_time: None,
            started: Instant::now(),
        }
    }

    /// Seed an account balance
    pub fn with_account(mut self, address: &str, balance: u128) -> Self {
        self.ledger
            .get_mut()
            .balances
            .insert(address.to_lowercase(), balance);
        self
    }

    /// Simulated round-trip time of every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Produce empty blocks at a fixed interval in addition to mined ones
    pub fn with_block_time(mut self, block_time: Duration) -> Self {
        self.block_time = Some(block_time);
        self
    }

    pub async fn fund(&self, address: &str, amount: u128) {
        let mut ledger = self.ledger.lock().await;
        *ledger.balances.entry(address.to_lowercase()).or_default() += amount;
    }

    async fn round_trip(&self) {
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn timed_blocks(&self) -> u64 {
        match self.block_time {
            Some(bt) if !bt.is_zero() => (self.started.elapsed().as_millis() / bt.as_millis()) as u64,
            _ => 0,
        }
    }
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for MemoryChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.round_trip().await;
        let ledger = self.ledger.lock().await;
        Ok(ledger.mined + self.timed_blocks())
    }

    async fn get_balance(&self, address: &str) -> Result<u128, ChainError> {
        self.round_trip().await;
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .balances
            .get(&address.to_lowercase())
            .copied()
            .unwrap_or(0))
    }

    async fn get_transaction_count(&self, address: &str) -> Result<u64, ChainError> {
        self.round_trip().await;
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .nonces
            .get(&address.to_lowercase())
            .copied()
            .unwrap_or(0))
    }

    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<String, ChainError> {
        self.round_trip().await;
        let timed = self.timed_blocks();
        let mut ledger = self.ledger.lock().await;

        let from = tx.from.to_lowercase();
        let balance = ledger.balances.get(&from).copied().unwrap_or(0);
        if balance < tx.value {
            return Err(ChainError::InsufficientFunds(tx.from.clone()));
        }

        ledger.tx_counter += 1;
        ledger.mined += 1;
        let tx_hash = format!("0x{:064x}", ledger.tx_counter);

        ledger.balances.insert(from.clone(), balance - tx.value);
        *ledger.nonces.entry(from).or_default() += 1;

        let contract_address = match &tx.to {
            Some(to) => {
                *ledger.balances.entry(to.to_lowercase()).or_default() += tx.value;
                None
            }
            None => Some(format!("0x{:040x}", 0xc0de_0000_u64 + ledger.tx_counter)),
        };

        let receipt = TransactionReceipt {
            transaction_hash: tx_hash.clone(),
            block_number: ledger.mined + timed,
            success: true,
            contract_address,
        };
        ledger.receipts.insert(tx_hash.clone(), receipt);

        debug!("Memory chain mined {} in block {}", tx_hash, ledger.mined + timed);
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> Result<TransactionReceipt, ChainError> {
        self.round_trip().await;
        let ledger = self.ledger.lock().await;
        ledger
            .receipts
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| ChainError::ConfirmationTimeout(tx_hash.to_string(), timeout.as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{Signer, SignerKind};

    const ALICE: &str = "0x00000000000000000000000000000000000000A1";
    const BOB: &str = "0x00000000000000000000000000000000000000b0";

    #[tokio::test]
    async fn test_transfer_moves_value_and_mines() {
        let chain = MemoryChain::new().with_account(ALICE, 100);
        let alice = Signer::new(ALICE, SignerKind::Evm);

        let hash = chain
            .send_transaction(&TransactionRequest::transfer(&alice, BOB, 40))
            .await
            .unwrap();
        let receipt = chain
            .wait_for_confirmation(&hash, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(receipt.success);
        assert_eq!(receipt.block_number, 1);
        assert_eq!(chain.get_balance(ALICE).await.unwrap(), 60);
        assert_eq!(chain.get_balance(BOB).await.unwrap(), 40);
        assert_eq!(chain.get_transaction_count(ALICE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let chain = MemoryChain::new();
        let alice = Signer::new(ALICE, SignerKind::Evm);
        let err = chain
            .send_transaction(&TransactionRequest::transfer(&alice, BOB, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::InsufficientFunds(_)));
    }

    #[tokio::test]
    async fn test_unknown_receipt_times_out() {
        let chain = MemoryChain::new();
        let err = chain
            .wait_for_confirmation("0x01", Duration::from_millis(5))
            .await
            .unwrap_err();
        assert_eq!(err, ChainError::ConfirmationTimeout("0x01".to_string(), 5));
    }

    #[tokio::test]
    async fn test_fund_is_case_insensitive() {
        let chain = MemoryChain::new();
        chain.fund(ALICE, 7).await;
        assert_eq!(chain.get_balance(&ALICE.to_lowercase()).await.unwrap(), 7);
    }
}

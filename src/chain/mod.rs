//! Chain module - transaction submission and bridge contract plumbing
//!
//! This module provides:
//! - The signer/submitter seam the orchestrator drives
//! - Multi-RPC provider management with automatic failover
//! - Token bridge call encoding and message-publication log parsing
//! - A local-wallet submitter over ethers providers

pub mod provider;
pub mod submitter;
pub mod token_bridge;

pub use provider::ChainProvider;
pub use submitter::EthersSubmitter;
pub use token_bridge::{BridgeContracts, PublishedMessage};

use crate::error::TrackerResult;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

/// Contract call to be signed and sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl TxRequest {
    pub fn call(to: Address, data: Bytes) -> Self {
        Self {
            to,
            data,
            value: U256::zero(),
        }
    }
}

/// Signs and submits transactions on bridge chains
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Sign and broadcast; returns the transaction hash.
    /// Rejection by the signer or the chain is a `Submission` error.
    async fn submit(&self, chain: u16, request: TxRequest) -> TrackerResult<H256>;

    /// Wait until the transaction is mined with enough confirmations
    async fn wait_for_confirmation(
        &self,
        chain: u16,
        tx_hash: H256,
    ) -> TrackerResult<TransactionReceipt>;
}

/// Whether a mined receipt reports success
pub fn receipt_succeeded(receipt: &TransactionReceipt) -> bool {
    receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false)
}

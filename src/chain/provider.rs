//! Chain provider with multi-RPC support and automatic failover

use crate::config::ChainConfig;
use crate::error::{TrackerError, TrackerResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    pub fn new(config: ChainConfig) -> TrackerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider.interval(Duration::from_millis(500)));
                    debug!("Added HTTP provider for {}: {}", config.name, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(TrackerError::submission(
                config.bridge_chain_id,
                "No valid RPC providers",
            ));
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("{} failover to provider {}", self.config.name, next);
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> TrackerResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!("Failed to get block number from {}: {}", self.config.name, e);
                    self.failover();
                }
            }
        }

        Err(self.all_failed("get block number"))
    }

    /// Get transaction receipt with failover
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> TrackerResult<Option<TransactionReceipt>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_transaction_receipt(tx_hash).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    warn!("Failed to get receipt from {}: {}", self.config.name, e);
                    self.failover();
                }
            }
        }

        Err(self.all_failed("get transaction receipt"))
    }

    /// Fill nonce, gas and fees. Simulation reverts surface here.
    pub async fn fill_transaction(&self, tx: &mut TypedTransaction) -> TrackerResult<()> {
        self.http()
            .fill_transaction(tx, None)
            .await
            .map_err(|e| TrackerError::submission(self.config.bridge_chain_id, e.to_string()))
    }

    /// Broadcast a signed transaction on the active provider
    pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ProviderError> {
        let pending = self.http().send_raw_transaction(raw).await?;
        Ok(pending.tx_hash())
    }

    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for {}: {}", self.config.name, e);
                false
            }
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn bridge_chain_id(&self) -> u16 {
        self.config.bridge_chain_id
    }

    pub fn evm_chain_id(&self) -> u64 {
        self.config.evm_chain_id
    }

    pub fn confirmation_blocks(&self) -> u64 {
        self.config.confirmation_blocks
    }

    fn all_failed(&self, operation: &str) -> TrackerError {
        TrackerError::submission(
            self.config.bridge_chain_id,
            format!("All providers failed to {}", operation),
        )
    }
}

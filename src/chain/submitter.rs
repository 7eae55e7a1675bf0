//! Local-wallet transaction submitter with send retries and confirmation tracking

use super::provider::ChainProvider;
use super::{TransactionSubmitter, TxRequest};
use crate::config::{Settings, TxType};
use crate::error::{TrackerError, TrackerResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Submits bridge calls with a single local key across all configured chains
pub struct EthersSubmitter {
    providers: HashMap<u16, Arc<ChainProvider>>,
    wallet: LocalWallet,
}

impl EthersSubmitter {
    /// Build providers for every enabled chain and load the signing key
    pub fn new(settings: &Settings) -> TrackerResult<Self> {
        let wallet = Self::load_wallet(&settings.wallet.private_key_env)?;
        info!("Transaction submitter initialized with wallet: {:?}", wallet.address());

        let mut providers = HashMap::new();
        for chain in settings.enabled_chains() {
            let provider = ChainProvider::new(chain.clone())?;
            info!(
                "Connected to {} (bridge id {}, evm id {})",
                chain.name, chain.bridge_chain_id, chain.evm_chain_id
            );
            providers.insert(chain.bridge_chain_id, Arc::new(provider));
        }

        Ok(Self::with_providers(providers, wallet))
    }

    pub fn with_providers(providers: HashMap<u16, Arc<ChainProvider>>, wallet: LocalWallet) -> Self {
        Self { providers, wallet }
    }

    fn load_wallet(env_var: &str) -> TrackerResult<LocalWallet> {
        let key = std::env::var(env_var).map_err(|_| {
            TrackerError::config(format!("No wallet configured. Set {}", env_var))
        })?;

        key.trim()
            .parse::<LocalWallet>()
            .map_err(|e| TrackerError::config(format!("Invalid private key: {}", e)))
    }

    pub fn wallet_address(&self) -> Address {
        self.wallet.address()
    }

    pub fn provider(&self, chain: u16) -> TrackerResult<Arc<ChainProvider>> {
        self.providers
            .get(&chain)
            .cloned()
            .ok_or(TrackerError::ChainNotFound { chain })
    }

    /// Check all providers, returning `(bridge chain id, healthy)` pairs
    pub async fn health(&self) -> Vec<(u16, bool)> {
        let mut results = Vec::with_capacity(self.providers.len());
        for (chain, provider) in &self.providers {
            results.push((*chain, provider.health_check().await));
        }
        results.sort_by_key(|(chain, _)| *chain);
        results
    }

    fn build_tx(&self, tx_type: TxType, evm_chain_id: u64, request: TxRequest) -> TypedTransaction {
        let from = self.wallet.address();
        match tx_type {
            TxType::Legacy => TypedTransaction::Legacy(
                TransactionRequest::new()
                    .from(from)
                    .to(request.to)
                    .data(request.data)
                    .value(request.value)
                    .chain_id(evm_chain_id),
            ),
            TxType::Eip1559 => TypedTransaction::Eip1559(
                Eip1559TransactionRequest::new()
                    .from(from)
                    .to(request.to)
                    .data(request.data)
                    .value(request.value)
                    .chain_id(evm_chain_id),
            ),
        }
    }

    /// Sign and send, retrying transient failures
    async fn send_with_retry(
        &self,
        provider: &ChainProvider,
        tx: TypedTransaction,
    ) -> TrackerResult<H256> {
        let chain = provider.bridge_chain_id();
        let config = provider.config();
        let wallet = self.wallet.clone().with_chain_id(provider.evm_chain_id());

        let max_attempts = config.max_send_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let signed_tx = match wallet.sign_transaction(&tx).await {
                Ok(sig) => tx.rlp_signed(&sig),
                Err(e) => {
                    error!("Failed to sign transaction: {}", e);
                    return Err(TrackerError::submission(chain, e.to_string()));
                }
            };

            match timeout(SEND_TIMEOUT, provider.send_raw_transaction(signed_tx)).await {
                Ok(Ok(tx_hash)) => {
                    info!(
                        "Transaction sent on {}: {:?} (attempt {}/{})",
                        config.name, tx_hash, attempt, max_attempts
                    );
                    return Ok(tx_hash);
                }
                Ok(Err(e)) => {
                    let error_msg = e.to_string();

                    if error_msg.contains("insufficient funds")
                        || error_msg.contains("nonce too low")
                        || error_msg.contains("execution reverted")
                    {
                        return Err(TrackerError::submission(chain, error_msg));
                    }

                    warn!("Send failed on {} (attempt {}): {}", config.name, attempt, error_msg);
                    provider.failover();
                    last_error = Some(TrackerError::submission(chain, error_msg));
                }
                Err(_) => {
                    warn!("Transaction send timeout on {} (attempt {})", config.name, attempt);
                    last_error = Some(TrackerError::submission(chain, "send timed out"));
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| TrackerError::submission(chain, "Unknown error")))
    }

    async fn poll_confirmations(
        &self,
        provider: &ChainProvider,
        tx_hash: H256,
    ) -> TrackerResult<TransactionReceipt> {
        let required = provider.confirmation_blocks().max(1);

        loop {
            match provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if let Some(mined_in) = receipt.block_number {
                        let head = provider.get_block_number().await?;
                        let confirmations = confirmations(head, mined_in.as_u64());
                        if confirmations >= required {
                            return Ok(receipt);
                        }
                        debug!(
                            "{:?} has {}/{} confirmations",
                            tx_hash, confirmations, required
                        );
                    }
                }
                Ok(None) => debug!("{:?} not mined yet", tx_hash),
                Err(e) => warn!("Receipt lookup for {:?} failed: {}", tx_hash, e),
            }

            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

/// Blocks on top of (and including) the block a transaction was mined in
fn confirmations(head: u64, mined_in: u64) -> u64 {
    if head < mined_in {
        0
    } else {
        head - mined_in + 1
    }
}

#[async_trait]
impl TransactionSubmitter for EthersSubmitter {
    async fn submit(&self, chain: u16, request: TxRequest) -> TrackerResult<H256> {
        let provider = self.provider(chain)?;
        let config = provider.config();

        let mut tx = self.build_tx(config.tx_type, config.evm_chain_id, request);
        provider.fill_transaction(&mut tx).await?;

        let tx_hash = self.send_with_retry(&provider, tx).await?;
        crate::metrics::record_tx_submitted(chain);
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(
        &self,
        chain: u16,
        tx_hash: H256,
    ) -> TrackerResult<TransactionReceipt> {
        let provider = self.provider(chain)?;
        let limit = Duration::from_secs(provider.config().confirmation_timeout_secs);

        timeout(limit, self.poll_confirmations(&provider, tx_hash))
            .await
            .map_err(|_| {
                TrackerError::submission(
                    chain,
                    format!("{:?} not confirmed within {}s", tx_hash, limit.as_secs()),
                )
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;

    // Well-known development key
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn submitter() -> EthersSubmitter {
        let settings = Settings::parse(SAMPLE).unwrap();
        let mut providers = HashMap::new();
        for chain in settings.enabled_chains() {
            providers.insert(
                chain.bridge_chain_id,
                Arc::new(ChainProvider::new(chain.clone()).unwrap()),
            );
        }
        EthersSubmitter::with_providers(providers, DEV_KEY.parse().unwrap())
    }

    #[test]
    fn test_confirmation_count() {
        assert_eq!(confirmations(100, 100), 1);
        assert_eq!(confirmations(131, 100), 32);
        assert_eq!(confirmations(99, 100), 0);
    }

    #[test]
    fn test_builds_configured_tx_type() {
        let submitter = submitter();
        let request = TxRequest::call(Address::repeat_byte(0x3e), Bytes::from(vec![1, 2, 3]));

        let legacy = submitter.build_tx(TxType::Legacy, 8453, request.clone());
        assert!(matches!(legacy, TypedTransaction::Legacy(_)));

        let dynamic = submitter.build_tx(TxType::Eip1559, 1, request);
        assert!(matches!(dynamic, TypedTransaction::Eip1559(_)));
        assert_eq!(dynamic.from(), Some(&submitter.wallet_address()));
        assert_eq!(dynamic.chain_id(), Some(U64::from(1)));
    }

    #[test]
    fn test_unknown_chain() {
        assert!(matches!(
            submitter().provider(99),
            Err(TrackerError::ChainNotFound { chain: 99 })
        ));
    }

    #[test]
    fn test_missing_wallet_env() {
        let result = EthersSubmitter::load_wallet("XCHAIN_TEST_KEY_THAT_IS_NEVER_SET");
        assert!(matches!(result, Err(TrackerError::Config(_))));
    }
}

//! Configuration management for the cross-chain tracker
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::guardian::RetryPolicy;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub tracker: TrackerConfig,
    pub guardian: GuardianConfig,
    pub auction: AuctionConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub wallet: WalletConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    pub instance_id: String,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// How long finished transfers and terminal auctions stay queryable
    #[serde(default = "default_finished_retention_secs")]
    pub finished_retention_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardianConfig {
    /// Ordered list of guardian REST endpoints, tried first to last
    pub endpoints: Vec<String>,
    #[serde(default = "default_guardian_rounds")]
    pub rounds: u32,
    #[serde(default = "default_round_delay_ms")]
    pub round_delay_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuctionConfig {
    pub status_api_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_order_timeout_secs")]
    pub order_timeout_secs: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Environment variable holding the hex signer key
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Bridge-level chain id (16-bit, as carried in attestations)
    pub bridge_chain_id: u16,
    /// EVM chain id used for transaction signing
    pub evm_chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub core_bridge_address: String,
    pub token_bridge_address: String,
    pub confirmation_blocks: u64,
    #[serde(default)]
    pub tx_type: TxType,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_send_retries")]
    pub max_send_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    Legacy,
    #[default]
    Eip1559,
}

const MAX_POLL_INTERVAL_MS: u64 = 60 * 60 * 1_000;
const MAX_ORDER_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

fn default_cleanup_interval_secs() -> u64 {
    300
}

fn default_finished_retention_secs() -> u64 {
    86_400
}

fn default_guardian_rounds() -> u32 {
    30
}

fn default_round_delay_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_order_timeout_secs() -> u64 {
    30 * 60
}

fn default_confirmation_timeout_secs() -> u64 {
    600
}

fn default_send_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl Settings {
    /// Load settings from the file named by `XCHAIN_TRACKER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("XCHAIN_TRACKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse and validate configuration text
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str)?;

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.guardian.endpoints.is_empty() {
            anyhow::bail!("At least one guardian endpoint must be configured");
        }
        if self.guardian.rounds == 0 {
            anyhow::bail!("Guardian rounds must be at least 1");
        }
        let poll_interval_ms = self.auction.poll_interval_ms;
        if poll_interval_ms == 0 || poll_interval_ms > MAX_POLL_INTERVAL_MS {
            anyhow::bail!(
                "Auction poll interval must be between 1 and {} ms",
                MAX_POLL_INTERVAL_MS
            );
        }
        let order_timeout_secs = self.auction.order_timeout_secs;
        if order_timeout_secs == 0 || order_timeout_secs > MAX_ORDER_TIMEOUT_SECS {
            anyhow::bail!(
                "Auction order timeout must be between 1 and {} s",
                MAX_ORDER_TIMEOUT_SECS
            );
        }

        let mut seen = HashSet::new();
        for (name, chain) in &self.chains {
            if !chain.enabled {
                continue;
            }
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            chain
                .core_bridge()
                .with_context(|| format!("Chain {} core bridge address", name))?;
            chain
                .token_bridge()
                .with_context(|| format!("Chain {} token bridge address", name))?;
            if !seen.insert(chain.bridge_chain_id) {
                anyhow::bail!(
                    "Bridge chain id {} is configured more than once",
                    chain.bridge_chain_id
                );
            }
        }

        if self.enabled_chains().is_empty() {
            tracing::warn!("No chains enabled - transfers cannot be initiated");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<&ChainConfig> {
        self.chains.values().filter(|c| c.enabled).collect()
    }

    /// Get chain config by bridge chain id
    pub fn get_chain(&self, bridge_chain_id: u16) -> Option<&ChainConfig> {
        self.chains
            .values()
            .find(|c| c.enabled && c.bridge_chain_id == bridge_chain_id)
    }
}

impl GuardianConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            rounds: self.rounds,
            round_delay: Duration::from_millis(self.round_delay_ms),
        }
    }
}

impl AuctionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.order_timeout_secs)
    }
}

impl ChainConfig {
    pub fn core_bridge(&self) -> Result<Address> {
        self.core_bridge_address
            .parse()
            .with_context(|| format!("Invalid address: {}", self.core_bridge_address))
    }

    pub fn token_bridge(&self) -> Result<Address> {
        self.token_bridge_address
            .parse()
            .with_context(|| format!("Invalid address: {}", self.token_bridge_address))
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}

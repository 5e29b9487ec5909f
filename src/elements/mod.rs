use std::{fs, path::Path, time::Duration};

use alloy::primitives::{address, Address};
use anyhow::Context;
use bridge_config::BridgeConfig;
use serde::Deserialize;

use crate::utils::poll::BackoffPolicy;

pub mod artifact;
pub mod bridge_config;
pub mod cross_chain_message;
pub mod roles;
pub mod timelock_action;

pub const DEFAULT_SUBMISSION_FEE_MULTIPLIER: u64 = 5;
pub const DEFAULT_RELAY_GAS_LIMIT: u32 = 1_920_000;
pub const OP_L2_CROSS_DOMAIN_MESSENGER: Address =
    address!("4200000000000000000000000000000000000007");

/// Deployment and governance configuration (YAML, or TOML by extension).
#[derive(Debug, Deserialize)]
pub struct OrchestratorConfig {
    pub messaging: MessagingConfig,
    pub bridge: BridgePairConfig,
    pub artifacts: ArtifactPaths,
    pub l1_bridge: BridgeConfig,
    pub l2_bridge: BridgeConfig,
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagingConfig {
    Ticket {
        inbox: Address,
        #[serde(default = "default_submission_fee_multiplier")]
        submission_fee_multiplier: u64,
    },
    Relay {
        l1_messenger: Address,
        #[serde(default = "default_l2_messenger")]
        l2_messenger: Address,
        portal: Address,
        output_oracle: Address,
        #[serde(default = "default_relay_gas_limit")]
        gas_limit: u32,
        #[serde(default = "default_true")]
        requires_proof: bool,
    },
}

/// Inputs of the linked L1/L2 bridge deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgePairConfig {
    pub l1_token: Address,
    pub token_name: String,
    pub token_symbol: String,
    pub token_decimals: u8,
    /// Messaging endpoint the L1 bridge is constructed with.
    pub l1_messenger: Address,
    /// Messaging endpoint the L2 bridge is constructed with.
    pub l2_messenger: Address,
    pub l1_proxy_admin: Address,
    pub l2_proxy_admin: Address,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactPaths {
    pub l1_bridge: String,
    pub l2_bridge: String,
    pub l2_token: String,
    pub proxy: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GovernanceConfig {
    /// Timelock executor on L2.
    pub executor: Address,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub delivery_timeout_secs: u64,
    pub execution_timeout_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 2,
            max_backoff_secs: 60,
            delivery_timeout_secs: 60 * 60,
            // Covers a two-day delay plus a full challenge window.
            execution_timeout_secs: 14 * 24 * 60 * 60,
        }
    }
}

impl PollingConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(
            Duration::from_secs(self.initial_backoff_secs),
            Duration::from_secs(self.max_backoff_secs),
        )
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

fn default_submission_fee_multiplier() -> u64 {
    DEFAULT_SUBMISSION_FEE_MULTIPLIER
}

fn default_l2_messenger() -> Address {
    OP_L2_CROSS_DOMAIN_MESSENGER
}

fn default_relay_gas_limit() -> u32 {
    DEFAULT_RELAY_GAS_LIMIT
}

fn default_true() -> bool {
    true
}

impl OrchestratorConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&content, path.extension().is_some_and(|ext| ext == "toml"))
            .with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str, is_toml: bool) -> anyhow::Result<Self> {
        if is_toml {
            Ok(toml::from_str(content)?)
        } else {
            Ok(serde_yaml::from_str(content)?)
        }
    }
}

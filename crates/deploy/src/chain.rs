//! Chain configuration: RPC endpoint, signing credential reference and confirmation policy.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

/// Default number of confirmations required before a deployment is trusted.
pub const DEFAULT_CONFIRMATIONS: u64 = 1;

/// Default bound on the confirmation wait.
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 300;

/// Default interval between receipt/block polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Default headroom applied to `eth_estimateGas`.
pub const DEFAULT_GAS_MULTIPLIER_PERCENT: u64 = 120;

/// Configuration for one target chain.
///
/// Immutable once the plan is loaded. The signing key itself never lives in the plan, only the
/// name of the environment variable that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Identifier used by plan nodes to target this chain. Filled from the `[chains.<id>]` key.
    #[serde(default, skip_serializing)]
    pub id: String,
    /// JSON-RPC endpoint. `${VAR}` segments are expanded from the environment.
    pub rpc_url: String,
    /// Environment variable holding the hex-encoded private key of the deployer.
    pub private_key_env: String,
    /// Expected chain id, checked against `eth_chainId` when the client is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Fixed gas limit for creation transactions. Estimated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    /// Percentage applied to the estimated gas.
    #[serde(default = "default_gas_multiplier")]
    pub gas_multiplier_percent: u64,
    /// Confirmation policy consulted before a node's outputs are read.
    #[serde(default)]
    pub confirmation: ConfirmationPolicy,
}

fn default_gas_multiplier() -> u64 {
    DEFAULT_GAS_MULTIPLIER_PERCENT
}

impl ChainConfig {
    /// Create a chain config with default gas and confirmation settings.
    pub fn new(
        id: impl Into<String>,
        rpc_url: impl Into<String>,
        private_key_env: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            rpc_url: rpc_url.into(),
            private_key_env: private_key_env.into(),
            chain_id: None,
            gas_limit: None,
            gas_multiplier_percent: DEFAULT_GAS_MULTIPLIER_PERCENT,
            confirmation: ConfirmationPolicy::default(),
        }
    }

    /// Set the confirmation policy.
    pub fn with_confirmation(mut self, confirmation: ConfirmationPolicy) -> Self {
        self.confirmation = confirmation;
        self
    }

    /// Expand `${VAR}` references in the RPC URL and validate the result.
    pub fn resolve_rpc_url(&self) -> anyhow::Result<Url> {
        let expanded = expand_env(&self.rpc_url, |name| std::env::var(name).ok())?;
        Url::parse(&expanded).with_context(|| format!("Invalid RPC URL for chain `{}`", self.id))
    }

    /// Read the signing key from the configured environment variable.
    pub fn private_key(&self) -> anyhow::Result<String> {
        let key = std::env::var(&self.private_key_env).with_context(|| {
            format!(
                "Signing key variable `{}` is not set for chain `{}`",
                self.private_key_env, self.id
            )
        })?;
        if key.trim().is_empty() {
            anyhow::bail!(
                "Signing key variable `{}` is empty for chain `{}`",
                self.private_key_env,
                self.id
            );
        }
        Ok(key.trim().to_string())
    }
}

/// Per-chain confirmation policy.
///
/// Chains with confidential-compute initialisation (where contract state such as a derived
/// key pair is not readable right after mining) need a settle delay before reads are issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationPolicy {
    /// Number of blocks, including the inclusion block, before the receipt is trusted.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Minimum delay between mining and the first read of the contract's state.
    #[serde(default)]
    pub settle_delay_secs: u64,
    /// Bound on the wait for the receipt and confirmations.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Interval between polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_confirmations() -> u64 {
    DEFAULT_CONFIRMATIONS
}

fn default_timeout() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT_SECS
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            confirmations: DEFAULT_CONFIRMATIONS,
            settle_delay_secs: 0,
            timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl ConfirmationPolicy {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Expand `${NAME}` segments using `lookup`. Unknown variables are an error.
fn expand_env(input: &str, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("Unterminated `${{` in `{}`", input))?;
        let name = &after[..end];
        let value =
            lookup(name).with_context(|| format!("Environment variable `{}` is not set", name))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

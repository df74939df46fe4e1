//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::types::MAX_TOTAL_FEE_BPS;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub identities: IdentityConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
}

/// Identities checked on privileged entry points.
///
/// Opaque strings compared by equality; the core never interprets them.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// The accounting pool (only caller of deposit/withdraw/update_deposits)
    #[serde(default = "default_pool")]
    pub pool: String,
    /// Owner of privileged configuration
    #[serde(default = "default_owner")]
    pub owner: String,
    /// External caller allowed to drive the controller cadence
    #[serde(default = "default_deposit_controller")]
    pub deposit_controller: String,
    /// Identity allowed to report per-vault lifetime rewards
    #[serde(default = "default_rewards_source")]
    pub rewards_source: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            pool: default_pool(),
            owner: default_owner(),
            deposit_controller: default_deposit_controller(),
            rewards_source: default_rewards_source(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Maximum single-update increase in reported rewards, as basis points
    /// of the last synced total
    #[serde(default = "default_max_reward_change_bps")]
    pub max_reward_change_bps: u64,

    /// Per-vault principal capacity
    #[serde(default = "default_vault_max_deposits")]
    pub vault_max_deposits: u64,

    /// Backend unbonding escrow duration
    #[serde(default = "default_unbonding_escrow_secs")]
    pub unbonding_escrow_secs: u64,

    /// Escrow on validator-exit recovery, independent of the unbonding path
    #[serde(default = "default_exit_escrow_secs")]
    pub exit_escrow_secs: u64,

    /// Reference to the vault implementation stamped on new vaults
    #[serde(default = "default_vault_implementation")]
    pub vault_implementation: String,

    /// Fee receivers (total capped at 30%)
    #[serde(default)]
    pub fees: Vec<FeeConfig>,

    /// Validators to create vaults for at startup
    #[serde(default)]
    pub validators: Vec<String>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            max_reward_change_bps: default_max_reward_change_bps(),
            vault_max_deposits: default_vault_max_deposits(),
            unbonding_escrow_secs: default_unbonding_escrow_secs(),
            exit_escrow_secs: default_exit_escrow_secs(),
            vault_implementation: default_vault_implementation(),
            fees: vec![],
            validators: vec![],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeConfig {
    pub receiver: String,
    pub basis_points: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Minimum time between unbonding cycles
    #[serde(default = "default_min_time_between_unbonding_secs")]
    pub min_time_between_unbonding_secs: u64,

    /// Keeper loop cadence
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// How often the keeper triggers update_deposits, in poll ticks
    #[serde(default = "default_sync_every_ticks")]
    pub sync_every_ticks: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_time_between_unbonding_secs: default_min_time_between_unbonding_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            sync_every_ticks: default_sync_every_ticks(),
        }
    }
}

// Default value functions
fn default_pool() -> String {
    "pool".to_string()
}

fn default_owner() -> String {
    "owner".to_string()
}

fn default_deposit_controller() -> String {
    "deposit-controller".to_string()
}

fn default_rewards_source() -> String {
    "rewards-source".to_string()
}

fn default_max_reward_change_bps() -> u64 {
    500 // 5%
}

fn default_vault_max_deposits() -> u64 {
    1_000_000_000
}

fn default_unbonding_escrow_secs() -> u64 {
    28 * 24 * 3600
}

fn default_exit_escrow_secs() -> u64 {
    7 * 24 * 3600
}

fn default_vault_implementation() -> String {
    "vault-v1".to_string()
}

fn default_min_time_between_unbonding_secs() -> u64 {
    24 * 3600
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_sync_every_ticks() -> u64 {
    10
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix STAKEFLOW_)
            .add_source(
                config::Environment::with_prefix("STAKEFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let total_fee_bps: u64 = self.strategy.fees.iter().map(|f| f.basis_points).sum();
        if total_fee_bps > MAX_TOTAL_FEE_BPS {
            anyhow::bail!(
                "Total fee {}bps exceeds cap of {}bps",
                total_fee_bps,
                MAX_TOTAL_FEE_BPS
            );
        }

        if self.strategy.max_reward_change_bps == 0 {
            anyhow::bail!("max_reward_change_bps must be positive");
        }

        if self.strategy.vault_max_deposits == 0 {
            anyhow::bail!("vault_max_deposits must be positive");
        }

        if self.strategy.unbonding_escrow_secs == 0 {
            anyhow::bail!("unbonding_escrow_secs must be positive");
        }

        if self.controller.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be positive");
        }

        for fee in &self.strategy.fees {
            if fee.receiver.is_empty() {
                anyhow::bail!("Fee receiver cannot be empty");
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identities: IdentityConfig::default(),
            strategy: StrategyConfig::default(),
            controller: ControllerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.strategy.max_reward_change_bps, 500);
        assert_eq!(config.controller.min_time_between_unbonding_secs, 24 * 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[strategy]
max_reward_change_bps = 250
validators = ["val-a", "val-b"]

[[strategy.fees]]
receiver = "treasury"
basis_points = 1000

[controller]
min_time_between_unbonding_secs = 3600
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.strategy.max_reward_change_bps, 250);
        assert_eq!(config.strategy.validators.len(), 2);
        assert_eq!(config.strategy.fees[0].receiver, "treasury");
        assert_eq!(config.controller.min_time_between_unbonding_secs, 3600);
        // untouched sections fall back to defaults
        assert_eq!(config.identities.pool, "pool");
    }

    #[test]
    fn test_fee_cap_rejected() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[[strategy.fees]]
receiver = "a"
basis_points = 2000

[[strategy.fees]]
receiver = "b"
basis_points = 1500
"#
        )
        .unwrap();

        assert!(Config::load(file.path()).is_err());
    }
}

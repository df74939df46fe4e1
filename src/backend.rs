//! Staking backend seam
//!
//! The core never speaks any staking backend's wire protocol. It sees an
//! opaque five-operation capability surface; alternate backends can be
//! substituted without touching strategy logic.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::error::{Error, Result};

/// Opaque staking backend capability surface.
///
/// Calls are atomic sub-calls of the enclosing strategy operation: a
/// failure fails the whole operation before any accounting state is
/// committed. Retry safety depends on backend-specific idempotency this
/// core does not assume, so nothing here is auto-retried.
#[async_trait]
pub trait StakingBackend: Send + Sync {
    /// Delegate `amount` to `validator`.
    async fn delegate(&self, validator: &str, amount: u64) -> Result<()>;

    /// Start unbonding `amount` from `validator`; returns the escrow start.
    async fn begin_unbond(&self, validator: &str, amount: u64) -> Result<DateTime<Utc>>;

    /// Withdraw everything currently released for `validator`.
    async fn withdraw(&self, validator: &str) -> Result<u64>;

    /// Current delegated amount for `validator`.
    async fn query_delegation(&self, validator: &str) -> Result<u64>;

    /// Whether `validator` is still active (false once it has exited).
    async fn query_validator_active(&self, validator: &str) -> Result<bool>;
}

/// Per-validator buckets tracked by the simulated backend
#[derive(Debug, Clone, Default)]
struct Delegation {
    staked: u64,
    unbonding: u64,
    withdrawable: u64,
    exited: bool,
}

/// In-memory staking backend for tests and dry runs.
///
/// Exposes hooks to elapse escrow (`release_unbonding`), force a
/// validator exit (`deactivate`) and inject a one-shot failure
/// (`fail_next_call`) so rollback behavior can be exercised.
#[derive(Default)]
pub struct SimulatedBackend {
    delegations: DashMap<String, Delegation>,
    fail_next: AtomicBool,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next backend call fail
    pub fn fail_next_call(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Move a validator's unbonding bucket to withdrawable (escrow elapsed)
    pub fn release_unbonding(&self, validator: &str) {
        if let Some(mut entry) = self.delegations.get_mut(validator) {
            entry.withdrawable += entry.unbonding;
            entry.unbonding = 0;
        }
    }

    /// Simulate a validator exit: stake stops earning and becomes
    /// withdrawable through the exit path
    pub fn deactivate(&self, validator: &str) {
        let mut entry = self.delegations.entry(validator.to_string()).or_default();
        entry.exited = true;
        entry.withdrawable += entry.staked;
        entry.staked = 0;
    }

    fn check_failure(&self) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Backend("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StakingBackend for SimulatedBackend {
    async fn delegate(&self, validator: &str, amount: u64) -> Result<()> {
        self.check_failure()?;
        let mut entry = self.delegations.entry(validator.to_string()).or_default();
        if entry.exited {
            return Err(Error::Backend(format!("validator {validator} has exited")));
        }
        entry.staked += amount;
        debug!(validator, amount, staked = entry.staked, "delegated");
        Ok(())
    }

    async fn begin_unbond(&self, validator: &str, amount: u64) -> Result<DateTime<Utc>> {
        self.check_failure()?;
        let mut entry = self
            .delegations
            .get_mut(validator)
            .ok_or_else(|| Error::Backend(format!("unknown validator {validator}")))?;
        if entry.staked < amount {
            return Err(Error::Backend(format!(
                "validator {validator} has {} staked, cannot unbond {amount}",
                entry.staked
            )));
        }
        entry.staked -= amount;
        entry.unbonding += amount;
        debug!(validator, amount, "unbonding started");
        Ok(Utc::now())
    }

    async fn withdraw(&self, validator: &str) -> Result<u64> {
        self.check_failure()?;
        let mut entry = self
            .delegations
            .get_mut(validator)
            .ok_or_else(|| Error::Backend(format!("unknown validator {validator}")))?;
        let amount = entry.withdrawable;
        entry.withdrawable = 0;
        debug!(validator, amount, "withdrew released funds");
        Ok(amount)
    }

    async fn query_delegation(&self, validator: &str) -> Result<u64> {
        self.check_failure()?;
        Ok(self
            .delegations
            .get(validator)
            .map(|d| d.staked)
            .unwrap_or(0))
    }

    async fn query_validator_active(&self, validator: &str) -> Result<bool> {
        self.check_failure()?;
        Ok(self
            .delegations
            .get(validator)
            .map(|d| !d.exited)
            .unwrap_or(true))
    }
}

//! Fund-flow controller
//!
//! Policy layer above the strategy, designed to be driven by an external,
//! untrusted-but-rate-limited caller on a fixed cadence. Every mutating
//! action has a paired `should_*` view; after a policy-gate rejection the
//! caller re-checks the view and retries, never blind-retries.
//!
//! The controller owns only the unbonding rate limit and the pass-through
//! gating; all vault state is mutated through the strategy's entry points.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::pool::WithdrawalQueue;
use crate::strategy::StakeStrategy;
use crate::types::VaultId;

pub struct FundFlowController {
    strategy: Arc<RwLock<StakeStrategy>>,
    withdrawal_queue: Arc<dyn WithdrawalQueue>,
    owner: String,
    deposit_controller: String,
    min_time_between_unbonding: Duration,
    last_unbond_at: Option<DateTime<Utc>>,
}

impl FundFlowController {
    pub fn new(
        strategy: Arc<RwLock<StakeStrategy>>,
        withdrawal_queue: Arc<dyn WithdrawalQueue>,
        config: &Config,
    ) -> Self {
        Self {
            strategy,
            withdrawal_queue,
            owner: config.identities.owner.clone(),
            deposit_controller: config.identities.deposit_controller.clone(),
            min_time_between_unbonding: Duration::seconds(
                config.controller.min_time_between_unbonding_secs as i64,
            ),
            last_unbond_at: None,
        }
    }

    fn require_deposit_controller(&self, caller: &str) -> Result<()> {
        if caller != self.deposit_controller {
            return Err(Error::Unauthorized {
                caller: caller.to_string(),
                expected: "deposit controller",
            });
        }
        Ok(())
    }

    fn require_owner(&self, caller: &str) -> Result<()> {
        if caller != self.owner {
            return Err(Error::Unauthorized {
                caller: caller.to_string(),
                expected: "owner",
            });
        }
        Ok(())
    }

    fn rate_limit_remaining(&self, now: DateTime<Utc>) -> i64 {
        match self.last_unbond_at {
            Some(last) => (last + self.min_time_between_unbonding - now).num_seconds(),
            None => 0,
        }
    }

    // ---- deposit routing ----

    /// True whenever queued capital is waiting to be deployed; the amount
    /// is the full queued balance.
    pub async fn should_deposit_queued_tokens(&self) -> (bool, u64) {
        let queued = self.strategy.read().await.total_queued();
        (queued > 0, queued)
    }

    pub async fn deposit_queued_tokens(
        &self,
        caller: &str,
        vault_ids: &[VaultId],
        amounts: &[u64],
    ) -> Result<()> {
        self.require_deposit_controller(caller)?;
        self.strategy
            .write()
            .await
            .deposit_queued_tokens(vault_ids, amounts)
            .await
    }

    // ---- unbonding ----

    /// True iff withdrawal demand exceeds queued capital, no unbonding
    /// cycle is in flight, and the rate limit has elapsed.
    pub async fn should_unbond_vaults(&self) -> bool {
        let demand = self.withdrawal_queue.total_queued_withdrawals().await;
        let strategy = self.strategy.read().await;
        demand > strategy.total_queued()
            && strategy.num_vaults_unbonding() == 0
            && self.rate_limit_remaining(Utc::now()) <= 0
    }

    /// Unbond exactly the uncovered withdrawal demand
    pub async fn unbond_vaults(&mut self, caller: &str) -> Result<u64> {
        self.require_deposit_controller(caller)?;

        let now = Utc::now();
        let remaining = self.rate_limit_remaining(now);
        if remaining > 0 {
            return Err(Error::UnbondRateLimited {
                remaining_secs: remaining,
            });
        }

        let demand = self.withdrawal_queue.total_queued_withdrawals().await;
        let mut strategy = self.strategy.write().await;
        let queued = strategy.total_queued();
        if demand <= queued {
            return Err(Error::UnbondNotNeeded);
        }

        let amount = demand - queued;
        strategy.unbond(amount).await?;
        drop(strategy);

        self.last_unbond_at = Some(now);
        info!(amount, demand, queued, "unbonding triggered");
        Ok(amount)
    }

    /// Emergency bypass of the policy gates; the strategy still enforces
    /// the single-cycle invariant. Owner only.
    pub async fn force_unbond_vaults(
        &mut self,
        caller: &str,
        vault_ids: &[VaultId],
        amounts: &[u64],
    ) -> Result<()> {
        self.require_owner(caller)?;
        self.strategy
            .write()
            .await
            .force_unbond(vault_ids, amounts)
            .await?;
        self.last_unbond_at = Some(Utc::now());
        Ok(())
    }

    /// Enumerates the unbonding vaults whose escrow has elapsed; true iff
    /// that is the full (non-empty) unbonding set, matching
    /// `withdraw_vaults`' all-or-nothing contract.
    pub async fn should_withdraw_vaults(&self) -> (bool, Vec<VaultId>) {
        let strategy = self.strategy.read().await;
        let now = Utc::now();
        let escrow = strategy.unbonding_escrow();
        let unbonding = strategy.unbonding_vault_ids();
        let elapsed: Vec<VaultId> = unbonding
            .iter()
            .copied()
            .filter(|&id| {
                strategy
                    .vault(id)
                    .map(|v| v.unbond_escrow_elapsed(now, escrow))
                    .unwrap_or(false)
            })
            .collect();
        (!unbonding.is_empty() && elapsed == unbonding, elapsed)
    }

    /// Claim the full unbonding set, then trigger queue settlement so
    /// pending user withdrawals are paid in the same action.
    pub async fn withdraw_vaults(&self, caller: &str, vault_ids: &[VaultId]) -> Result<u64> {
        self.require_deposit_controller(caller)?;
        let mut strategy = self.strategy.write().await;
        strategy.claim_unbond(vault_ids).await?;
        let available = strategy.total_queued();
        drop(strategy);

        // the queue pays users and pulls the funds back through the
        // pool's withdraw path
        let paid = self.withdrawal_queue.settle(available).await?;
        info!(paid, "queue settlement triggered");
        Ok(paid)
    }

    /// Recover principal from exited vaults past their exit escrow
    pub async fn claim_validator_exits(&self, caller: &str, vault_ids: &[VaultId]) -> Result<u64> {
        self.require_deposit_controller(caller)?;
        self.strategy
            .write()
            .await
            .claim_validator_exits(vault_ids)
            .await
    }

    /// Mark vaults whose validator the backend reports as exited
    pub async fn sync_vault_status(&self, caller: &str) -> Result<Vec<VaultId>> {
        self.require_deposit_controller(caller)?;
        self.strategy.write().await.sync_validator_status().await
    }

    // ---- reward pass-throughs (strategy gates the rewards source) ----

    pub async fn restake_rewards(
        &self,
        caller: &str,
        vault_ids: &[VaultId],
        lifetime_values: &[u64],
        proofs: &[Vec<u8>],
    ) -> Result<u64> {
        self.strategy
            .write()
            .await
            .restake_rewards(caller, vault_ids, lifetime_values, proofs)
            .await
    }

    pub async fn withdraw_rewards(
        &self,
        caller: &str,
        vault_ids: &[VaultId],
        lifetime_values: &[u64],
        proofs: &[Vec<u8>],
    ) -> Result<u64> {
        self.strategy
            .write()
            .await
            .withdraw_rewards(caller, vault_ids, lifetime_values, proofs)
            .await
    }

    // ---- read-only aggregation views ----

    /// Principal plus unrealized rewards, per vault
    pub async fn get_vault_deposits(&self) -> Vec<u64> {
        let strategy = self.strategy.read().await;
        strategy.vaults().iter().map(|v| v.deposits()).collect()
    }

    pub async fn get_vault_rewards(&self) -> Vec<u64> {
        let strategy = self.strategy.read().await;
        strategy.vaults().iter().map(|v| v.rewards()).collect()
    }

    pub async fn get_unbonding_vaults(&self) -> Vec<VaultId> {
        self.strategy.read().await.unbonding_vault_ids()
    }

    pub async fn get_withdrawable_vaults(&self) -> Vec<VaultId> {
        self.should_withdraw_vaults().await.1
    }

    pub async fn get_inactive_vaults(&self) -> Vec<VaultId> {
        let strategy = self.strategy.read().await;
        strategy
            .vaults()
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_active)
            .map(|(id, _)| id)
            .collect()
    }

    /// Inactive vaults past their exit escrow with funds left to recover
    pub async fn get_inactive_withdrawable_vaults(&self) -> Vec<VaultId> {
        let strategy = self.strategy.read().await;
        let now = Utc::now();
        let escrow = strategy.exit_escrow();
        strategy
            .vaults()
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_active && !v.is_empty() && v.exit_escrow_elapsed(now, escrow))
            .map(|(id, _)| id)
            .collect()
    }

    // ---- privileged configuration ----

    pub fn set_deposit_controller(&mut self, caller: &str, identity: String) -> Result<()> {
        self.require_owner(caller)?;
        info!(from = self.deposit_controller, to = identity, "deposit controller changed");
        self.deposit_controller = identity;
        Ok(())
    }

    pub fn set_min_time_between_unbonding(&mut self, caller: &str, secs: u64) -> Result<()> {
        self.require_owner(caller)?;
        self.min_time_between_unbonding = Duration::seconds(secs as i64);
        info!(secs, "min time between unbonding changed");
        Ok(())
    }
}

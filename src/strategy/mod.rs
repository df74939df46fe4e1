//! Stake strategy
//!
//! Owns the vault registry and all pooled-capital accounting: queued
//! (undeployed) capital, round-robin unbonding against withdrawal demand,
//! validator-exit recovery, reward realization, and fee disbursement into
//! the accounting pool.
//!
//! Every mutating operation is plan-then-commit: validate against current
//! state, issue all backend sub-calls, and only then commit accounting
//! mutations. A backend failure therefore propagates before any state
//! changes, and the single-unbonding-cycle gate (`num_vaults_unbonding`)
//! makes double-unbonding the same principal structurally impossible.

pub mod fees;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::backend::StakingBackend;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pool::SharePool;
use crate::types::{apply_bps, VaultId};
use crate::vault::Vault;

pub use fees::{Fee, FeeSchedule};

/// Accounting and vault-orchestration layer between the pool and the
/// staking backend
pub struct StakeStrategy {
    backend: Arc<dyn StakingBackend>,
    pool: Arc<dyn SharePool>,

    // gated caller identities
    pool_id: String,
    owner: String,
    rewards_source: String,

    // policy parameters
    vault_max_deposits: u64,
    unbonding_escrow: Duration,
    exit_escrow: Duration,
    max_reward_change_bps: u64,
    vault_implementation: String,

    // accounting state
    vaults: Vec<Vault>,
    total_queued: u64,
    fees: FeeSchedule,
    withdrawal_cursor: usize,
    num_vaults_unbonding: usize,
    last_synced_total: u64,
}

impl StakeStrategy {
    pub fn new(
        backend: Arc<dyn StakingBackend>,
        pool: Arc<dyn SharePool>,
        config: &Config,
    ) -> Result<Self> {
        let fees = FeeSchedule::from_config(&config.strategy.fees)?;
        let mut strategy = Self {
            backend,
            pool,
            pool_id: config.identities.pool.clone(),
            owner: config.identities.owner.clone(),
            rewards_source: config.identities.rewards_source.clone(),
            vault_max_deposits: config.strategy.vault_max_deposits,
            unbonding_escrow: Duration::seconds(config.strategy.unbonding_escrow_secs as i64),
            exit_escrow: Duration::seconds(config.strategy.exit_escrow_secs as i64),
            max_reward_change_bps: config.strategy.max_reward_change_bps,
            vault_implementation: config.strategy.vault_implementation.clone(),
            vaults: Vec::new(),
            total_queued: 0,
            fees,
            withdrawal_cursor: 0,
            num_vaults_unbonding: 0,
            last_synced_total: 0,
        };
        for validator in &config.strategy.validators {
            strategy.push_vault(validator.clone());
        }
        Ok(strategy)
    }

    // ---- identity gates ----

    fn require(&self, caller: &str, id: &str, expected: &'static str) -> Result<()> {
        if caller != id {
            return Err(Error::Unauthorized {
                caller: caller.to_string(),
                expected,
            });
        }
        Ok(())
    }

    fn require_pool(&self, caller: &str) -> Result<()> {
        self.require(caller, &self.pool_id, "pool")
    }

    fn require_owner(&self, caller: &str) -> Result<()> {
        self.require(caller, &self.owner, "owner")
    }

    fn require_rewards_source(&self, caller: &str) -> Result<()> {
        self.require(caller, &self.rewards_source, "rewards source")
    }

    // ---- views ----

    /// totalQueued + Σ vault principal + Σ vault rewards
    pub fn total_deposits(&self) -> u64 {
        self.total_queued + self.vaults.iter().map(|v| v.deposits()).sum::<u64>()
    }

    /// Deposits not withdrawable without unbonding
    pub fn min_deposits(&self) -> u64 {
        self.total_deposits() - self.total_queued
    }

    /// Capacity ceiling: current deposits plus the remaining headroom of
    /// active vaults. Never below `total_deposits`.
    pub fn max_deposits(&self) -> u64 {
        self.total_deposits()
            + self
                .vaults
                .iter()
                .filter(|v| v.is_active)
                .map(|v| v.max_deposits.saturating_sub(v.principal))
                .sum::<u64>()
    }

    pub fn total_queued(&self) -> u64 {
        self.total_queued
    }

    pub fn num_vaults_unbonding(&self) -> usize {
        self.num_vaults_unbonding
    }

    pub fn last_synced_total(&self) -> u64 {
        self.last_synced_total
    }

    pub fn withdrawal_cursor(&self) -> usize {
        self.withdrawal_cursor
    }

    pub fn vault_count(&self) -> usize {
        self.vaults.len()
    }

    pub fn vault(&self, id: VaultId) -> Result<&Vault> {
        self.vaults.get(id).ok_or(Error::VaultNotFound(id))
    }

    pub fn vaults(&self) -> &[Vault] {
        &self.vaults
    }

    #[cfg(test)]
    pub(crate) fn vaults_mut(&mut self) -> &mut [Vault] {
        &mut self.vaults
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    pub fn unbonding_escrow(&self) -> Duration {
        self.unbonding_escrow
    }

    pub fn exit_escrow(&self) -> Duration {
        self.exit_escrow
    }

    /// The full current unbonding set, ascending
    pub fn unbonding_vault_ids(&self) -> Vec<VaultId> {
        self.vaults
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_unbonding)
            .map(|(id, _)| id)
            .collect()
    }

    // ---- pool-facing flow ----

    /// Record a deposit of queued capital. Pool only.
    pub fn deposit(&mut self, caller: &str, amount: u64) -> Result<()> {
        self.require_pool(caller)?;
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        self.total_queued += amount;
        // flows move the baseline so update_deposits sees pure reward drift
        self.last_synced_total += amount;
        info!(amount, total_queued = self.total_queued, "deposit queued");
        Ok(())
    }

    /// Pay a withdrawal out of queued capital only; never touches vaults.
    /// Pool only.
    pub fn withdraw(&mut self, caller: &str, amount: u64) -> Result<()> {
        self.require_pool(caller)?;
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        if amount > self.total_queued {
            return Err(Error::InsufficientQueued {
                requested: amount,
                available: self.total_queued,
            });
        }
        self.total_queued -= amount;
        self.last_synced_total = self.last_synced_total.saturating_sub(amount);
        info!(amount, total_queued = self.total_queued, "withdrew queued");
        Ok(())
    }

    /// Delegate queued capital into vaults, pairwise. A vault id may
    /// repeat (cumulative). Deliberately separate from `deposit` so
    /// touching many vaults is batched and explicitly triggered.
    pub async fn deposit_queued_tokens(
        &mut self,
        vault_ids: &[VaultId],
        amounts: &[u64],
    ) -> Result<()> {
        if vault_ids.len() != amounts.len() {
            return Err(Error::LengthMismatch {
                left: vault_ids.len(),
                right: amounts.len(),
            });
        }

        // validate the whole batch before any backend call
        let mut cumulative: HashMap<VaultId, u64> = HashMap::new();
        let mut total: u64 = 0;
        for (&id, &amount) in vault_ids.iter().zip(amounts) {
            if amount == 0 {
                return Err(Error::ZeroAmount);
            }
            let vault = self.vault(id)?;
            if !vault.is_active {
                return Err(Error::VaultInactive(id));
            }
            let staged = cumulative.entry(id).or_insert(0);
            *staged += amount;
            if vault.principal + *staged > vault.max_deposits {
                return Err(Error::VaultCapExceeded {
                    vault_id: id,
                    attempted: vault.principal + *staged,
                    cap: vault.max_deposits,
                });
            }
            total += amount;
        }
        if total > self.total_queued {
            return Err(Error::InsufficientQueued {
                requested: total,
                available: self.total_queued,
            });
        }

        for (&id, &amount) in vault_ids.iter().zip(amounts) {
            self.backend
                .delegate(&self.vaults[id].validator, amount)
                .await?;
        }

        for (&id, &amount) in vault_ids.iter().zip(amounts) {
            self.vaults[id].delegate(id, amount)?;
        }
        self.total_queued -= total;
        info!(
            total,
            vaults = vault_ids.len(),
            total_queued = self.total_queued,
            "deployed queued tokens"
        );
        Ok(())
    }

    // ---- unbonding cycle ----

    /// Unbond at least `amount` of principal, walking vaults round-robin
    /// from the withdrawal cursor. Inactive vaults' deposits count toward
    /// the target without being unbonded (already recoverable through the
    /// exit path). At most one cycle may be in flight.
    pub async fn unbond(&mut self, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        if self.num_vaults_unbonding > 0 {
            return Err(Error::UnbondingInProgress(self.num_vaults_unbonding));
        }

        let n = self.vaults.len();
        let mut plan: Vec<(VaultId, u64)> = Vec::new();
        let mut accumulated: u64 = 0;
        let mut last_touched: Option<usize> = None;

        for step in 0..n {
            let idx = (self.withdrawal_cursor + step) % n;
            let vault = &self.vaults[idx];
            if !vault.is_active {
                if vault.principal > 0 {
                    accumulated += vault.principal;
                    last_touched = Some(idx);
                }
            } else if vault.principal > 0 {
                let take = vault.principal.min(amount - accumulated);
                plan.push((idx, take));
                accumulated += take;
                last_touched = Some(idx);
            }
            if accumulated >= amount {
                break;
            }
        }

        if accumulated < amount {
            return Err(Error::InsufficientPrincipal {
                requested: amount,
                available: accumulated,
            });
        }

        let mut starts = Vec::with_capacity(plan.len());
        for &(idx, take) in &plan {
            let started = self
                .backend
                .begin_unbond(&self.vaults[idx].validator, take)
                .await?;
            starts.push(started);
        }

        let mut unbonded: u64 = 0;
        for (&(idx, take), &started) in plan.iter().zip(&starts) {
            self.vaults[idx].begin_unbond(idx, take, started)?;
            self.num_vaults_unbonding += 1;
            unbonded += take;
        }
        // funds in escrow leave the deposit sum until claimed
        self.last_synced_total = self.last_synced_total.saturating_sub(unbonded);
        if let Some(idx) = last_touched {
            self.withdrawal_cursor = (idx + 1) % n;
        }
        info!(
            amount,
            unbonded,
            vaults = plan.len(),
            cursor = self.withdrawal_cursor,
            "unbonding cycle started"
        );
        Ok(())
    }

    /// Privileged bypass of rotation for targeted intervention. Shares the
    /// single-cycle gate with `unbond`: a forced cycle and a rotation
    /// cycle can never coexist.
    pub async fn force_unbond(&mut self, vault_ids: &[VaultId], amounts: &[u64]) -> Result<()> {
        if vault_ids.len() != amounts.len() {
            return Err(Error::LengthMismatch {
                left: vault_ids.len(),
                right: amounts.len(),
            });
        }
        if !vault_ids.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::VaultIdsNotAscending);
        }
        if self.num_vaults_unbonding > 0 {
            return Err(Error::UnbondingInProgress(self.num_vaults_unbonding));
        }

        for (&id, &amount) in vault_ids.iter().zip(amounts) {
            if amount == 0 {
                return Err(Error::ZeroAmount);
            }
            let vault = self.vault(id)?;
            if !vault.is_active {
                return Err(Error::VaultInactive(id));
            }
            if amount > vault.principal {
                return Err(Error::InsufficientPrincipal {
                    requested: amount,
                    available: vault.principal,
                });
            }
        }

        let mut starts = Vec::with_capacity(vault_ids.len());
        for (&id, &amount) in vault_ids.iter().zip(amounts) {
            let started = self
                .backend
                .begin_unbond(&self.vaults[id].validator, amount)
                .await?;
            starts.push(started);
        }

        let mut unbonded = 0;
        for ((&id, &amount), &started) in vault_ids.iter().zip(amounts).zip(&starts) {
            self.vaults[id].begin_unbond(id, amount, started)?;
            self.num_vaults_unbonding += 1;
            unbonded += amount;
        }
        self.last_synced_total = self.last_synced_total.saturating_sub(unbonded);
        warn!(unbonded, vaults = vault_ids.len(), "forced unbonding cycle");
        Ok(())
    }

    /// Claim a finished unbonding cycle. Must name exactly the full
    /// current unbonding set; releases every vault's escrowed withdrawals
    /// back into queued capital.
    pub async fn claim_unbond(&mut self, vault_ids: &[VaultId]) -> Result<u64> {
        let expected = self.unbonding_vault_ids();
        let mut got = vault_ids.to_vec();
        got.sort_unstable();
        got.dedup();
        if expected.is_empty() || got != expected {
            return Err(Error::PartialClaim { expected, got });
        }

        let now = Utc::now();
        for &id in &expected {
            let vault = &self.vaults[id];
            if !vault.unbond_escrow_elapsed(now, self.unbonding_escrow) {
                let started = vault.unbonding_started_at.unwrap_or(now);
                return Err(Error::EscrowNotElapsed {
                    vault_id: id,
                    remaining_secs: (started + self.unbonding_escrow - now).num_seconds(),
                });
            }
        }

        for &id in &expected {
            let withdrawn = self.backend.withdraw(&self.vaults[id].validator).await?;
            let escrowed = self.vaults[id].queued_withdrawals;
            if withdrawn != escrowed {
                warn!(
                    id,
                    withdrawn, escrowed, "backend withdrawal differs from escrowed amount"
                );
            }
        }

        let mut released_total = 0;
        for &id in &expected {
            let released = self.vaults[id].complete_unbond(id, now, self.unbonding_escrow)?;
            self.total_queued += released;
            released_total += released;
        }
        self.num_vaults_unbonding = 0;
        self.last_synced_total += released_total;
        info!(
            released = released_total,
            vaults = expected.len(),
            total_queued = self.total_queued,
            "unbonding cycle claimed"
        );
        Ok(released_total)
    }

    /// Recover principal from vaults whose validator has exited and passed
    /// its own escrow
    pub async fn claim_validator_exits(&mut self, vault_ids: &[VaultId]) -> Result<u64> {
        if !vault_ids.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::VaultIdsNotAscending);
        }
        let now = Utc::now();
        for &id in vault_ids {
            let vault = self.vault(id)?;
            if vault.is_active {
                return Err(Error::ValidatorNotExited { vault_id: id });
            }
            if !vault.exit_escrow_elapsed(now, self.exit_escrow) {
                let exited = vault.exited_at.unwrap_or(now);
                return Err(Error::EscrowNotElapsed {
                    vault_id: id,
                    remaining_secs: (exited + self.exit_escrow - now).num_seconds(),
                });
            }
        }

        for &id in vault_ids {
            let withdrawn = self.backend.withdraw(&self.vaults[id].validator).await?;
            let recoverable = self.vaults[id].principal + self.vaults[id].queued_withdrawals;
            if withdrawn != recoverable {
                warn!(
                    id,
                    withdrawn, recoverable, "backend withdrawal differs from recoverable balance"
                );
            }
        }

        let mut recovered_total = 0;
        for &id in vault_ids {
            let stranded_escrow = self.vaults[id].queued_withdrawals;
            if self.vaults[id].is_unbonding {
                self.num_vaults_unbonding -= 1;
            }
            let recovered = self.vaults[id].drain_exited(id, now, self.exit_escrow)?;
            self.total_queued += recovered;
            // only the stranded escrow part re-enters the deposit sum
            self.last_synced_total += stranded_escrow;
            recovered_total += recovered;
        }
        info!(
            recovered = recovered_total,
            vaults = vault_ids.len(),
            "validator exits claimed"
        );
        Ok(recovered_total)
    }

    // ---- rewards ----

    /// Validate a batched lifetime-reward report: monotonic per vault and
    /// aggregate drift-bounded. Returns the per-vault deltas.
    fn check_reward_report(
        &self,
        vault_ids: &[VaultId],
        lifetime_values: &[u64],
        proofs: &[Vec<u8>],
    ) -> Result<Vec<u64>> {
        if vault_ids.len() != lifetime_values.len() {
            return Err(Error::LengthMismatch {
                left: vault_ids.len(),
                right: lifetime_values.len(),
            });
        }
        if vault_ids.len() != proofs.len() {
            return Err(Error::LengthMismatch {
                left: vault_ids.len(),
                right: proofs.len(),
            });
        }
        // a repeated id would realize the same rewards twice
        if !vault_ids.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::VaultIdsNotAscending);
        }

        let mut deltas = Vec::with_capacity(vault_ids.len());
        // widened so absurd reported values cannot wrap past the bound
        let mut total_delta: u128 = 0;
        for (&id, &value) in vault_ids.iter().zip(lifetime_values) {
            let vault = self.vault(id)?;
            let previous = vault.lifetime_rewards_reported.get();
            if value < previous {
                return Err(Error::RewardsDecreased {
                    reported: value,
                    previous,
                });
            }
            deltas.push(value - previous);
            total_delta += (value - previous) as u128;
        }

        // bound the blast radius of a faulty reward source
        let max = apply_bps(self.last_synced_total, self.max_reward_change_bps);
        if total_delta > max as u128 {
            return Err(Error::RewardDriftExceeded {
                delta: u64::try_from(total_delta).unwrap_or(u64::MAX),
                max,
            });
        }
        Ok(deltas)
    }

    /// Report lifetime rewards and fold the accrued balance back into
    /// principal, re-delegating at the backend. Rewards source only.
    /// Proofs are opaque and passed through without interpretation.
    pub async fn restake_rewards(
        &mut self,
        caller: &str,
        vault_ids: &[VaultId],
        lifetime_values: &[u64],
        proofs: &[Vec<u8>],
    ) -> Result<u64> {
        self.require_rewards_source(caller)?;
        let deltas = self.check_reward_report(vault_ids, lifetime_values, proofs)?;

        // restake everything accrued, including rewards reported earlier
        let restakes: Vec<u64> = vault_ids
            .iter()
            .zip(&deltas)
            .map(|(&id, &delta)| self.vaults[id].rewards() + delta)
            .collect();

        for (&id, &restake) in vault_ids.iter().zip(&restakes) {
            if restake > 0 {
                self.backend
                    .delegate(&self.vaults[id].validator, restake)
                    .await?;
            }
        }

        let mut restaked_total = 0;
        for ((&id, &value), &restake) in vault_ids.iter().zip(lifetime_values).zip(&restakes) {
            self.vaults[id].report_lifetime_rewards(value)?;
            if restake > 0 {
                self.vaults[id].restake_rewards(restake)?;
                restaked_total += restake;
            }
        }
        debug!(proofs = proofs.len(), "reward proofs passed through");
        info!(restaked = restaked_total, vaults = vault_ids.len(), "rewards restaked");
        Ok(restaked_total)
    }

    /// Report lifetime rewards and realize the accrued balance out of the
    /// vaults (routed to the external reward distribution). Rewards source
    /// only.
    pub async fn withdraw_rewards(
        &mut self,
        caller: &str,
        vault_ids: &[VaultId],
        lifetime_values: &[u64],
        proofs: &[Vec<u8>],
    ) -> Result<u64> {
        self.require_rewards_source(caller)?;
        self.check_reward_report(vault_ids, lifetime_values, proofs)?;

        let mut claimed_total = 0;
        for (&id, &value) in vault_ids.iter().zip(lifetime_values) {
            self.vaults[id].report_lifetime_rewards(value)?;
            let accrued = self.vaults[id].rewards();
            if accrued > 0 {
                self.vaults[id].claim_rewards(accrued)?;
                claimed_total += accrued;
            }
        }
        // realized rewards leave the deposit sum
        self.last_synced_total = self.last_synced_total.saturating_sub(claimed_total);
        debug!(proofs = proofs.len(), "reward proofs passed through");
        info!(claimed = claimed_total, vaults = vault_ids.len(), "rewards withdrawn");
        Ok(claimed_total)
    }

    /// Realize the reward delta into the pool's share price. Pool only.
    ///
    /// A positive delta pays each fee receiver's share before advancing
    /// the baseline; a non-positive delta (e.g. slashing) skips fees but
    /// still advances it.
    pub async fn update_deposits(&mut self, caller: &str) -> Result<i128> {
        self.require_pool(caller)?;
        let current = self.total_deposits();
        let delta = current as i128 - self.last_synced_total as i128;

        if delta > 0 {
            let max = apply_bps(self.last_synced_total, self.max_reward_change_bps);
            if delta as u64 > max {
                return Err(Error::RewardDriftExceeded {
                    delta: delta as u64,
                    max,
                });
            }
            for (receiver, amount) in self.fees.split(delta as u64) {
                self.pool.credit_fees(&receiver, amount).await?;
            }
        } else if delta < 0 {
            warn!(delta, "negative deposit delta (slashing?)");
        }

        self.last_synced_total = current;
        info!(delta, total = current, "deposits synced");
        Ok(delta)
    }

    // ---- vault lifecycle ----

    fn push_vault(&mut self, validator: String) -> VaultId {
        self.vaults.push(Vault::new(
            validator,
            self.vault_implementation.clone(),
            self.vault_max_deposits,
        ));
        self.vaults.len() - 1
    }

    /// Add a vault for `validator`. Owner only.
    pub fn add_vault(&mut self, caller: &str, validator: String) -> Result<VaultId> {
        self.require_owner(caller)?;
        let id = self.push_vault(validator.clone());
        info!(id, validator, "vault added");
        Ok(id)
    }

    /// Remove vaults. Each must be empty; an exited vault past its escrow
    /// is auto-drained first. The withdrawal cursor is adjusted as part of
    /// the same removal so it keeps pointing at the same logical vault.
    /// Owner only.
    pub async fn remove_vaults(&mut self, caller: &str, vault_ids: &[VaultId]) -> Result<()> {
        self.require_owner(caller)?;
        if !vault_ids.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::VaultIdsNotAscending);
        }

        let now = Utc::now();
        let mut drains: Vec<VaultId> = Vec::new();
        for &id in vault_ids {
            let vault = self.vault(id)?;
            if vault.is_empty() {
                continue;
            }
            if !vault.is_active && vault.exit_escrow_elapsed(now, self.exit_escrow) {
                drains.push(id);
            } else {
                return Err(Error::VaultNotEmpty {
                    vault_id: id,
                    principal: vault.principal,
                    queued: vault.queued_withdrawals,
                });
            }
        }

        for &id in &drains {
            let withdrawn = self.backend.withdraw(&self.vaults[id].validator).await?;
            let recoverable = self.vaults[id].principal + self.vaults[id].queued_withdrawals;
            if withdrawn != recoverable {
                warn!(
                    id,
                    withdrawn, recoverable, "backend withdrawal differs from recoverable balance"
                );
            }
        }

        for &id in &drains {
            let stranded_escrow = self.vaults[id].queued_withdrawals;
            if self.vaults[id].is_unbonding {
                self.num_vaults_unbonding -= 1;
            }
            let recovered = self.vaults[id].drain_exited(id, now, self.exit_escrow)?;
            self.total_queued += recovered;
            self.last_synced_total += stranded_escrow;
        }

        // remove back-to-front so earlier ids stay valid
        for &id in vault_ids.iter().rev() {
            let vault = self.vaults.remove(id);
            if id < self.withdrawal_cursor {
                self.withdrawal_cursor -= 1;
            }
            info!(id, validator = vault.validator, "vault removed");
        }
        if self.withdrawal_cursor >= self.vaults.len() {
            self.withdrawal_cursor = 0;
        }
        Ok(())
    }

    /// Stamp the current vault implementation onto the named vaults.
    /// Owner only.
    pub fn upgrade_vaults(&mut self, caller: &str, vault_ids: &[VaultId]) -> Result<()> {
        self.require_owner(caller)?;
        for &id in vault_ids {
            self.vault(id)?;
        }
        for &id in vault_ids {
            self.vaults[id].implementation = self.vault_implementation.clone();
        }
        info!(
            vaults = vault_ids.len(),
            implementation = self.vault_implementation,
            "vaults upgraded"
        );
        Ok(())
    }

    /// Owner only.
    pub fn set_vault_implementation(&mut self, caller: &str, reference: String) -> Result<()> {
        self.require_owner(caller)?;
        info!(from = self.vault_implementation, to = reference, "vault implementation changed");
        self.vault_implementation = reference;
        Ok(())
    }

    /// Owner only.
    pub fn add_fee(&mut self, caller: &str, receiver: String, basis_points: u64) -> Result<()> {
        self.require_owner(caller)?;
        self.fees.add(receiver, basis_points)
    }

    /// Owner only. A zero share deletes the entry.
    pub fn update_fee(
        &mut self,
        caller: &str,
        index: usize,
        receiver: String,
        basis_points: u64,
    ) -> Result<()> {
        self.require_owner(caller)?;
        self.fees.update(index, receiver, basis_points)
    }

    /// Query the backend for validator exits and mark the affected vaults
    /// inactive. Returns the newly inactive vault ids.
    ///
    /// Also reconciles each remaining active vault's recorded principal
    /// against the backend's delegation; a shortfall (possible slashing)
    /// is surfaced here and shows up as a negative delta at the next
    /// `update_deposits`.
    pub async fn sync_validator_status(&mut self) -> Result<Vec<VaultId>> {
        let mut exited = Vec::new();
        for (id, vault) in self.vaults.iter().enumerate() {
            if !vault.is_active {
                continue;
            }
            if !self.backend.query_validator_active(&vault.validator).await? {
                exited.push(id);
                continue;
            }
            let delegated = self.backend.query_delegation(&vault.validator).await?;
            if delegated < vault.principal {
                warn!(
                    id,
                    validator = vault.validator,
                    recorded = vault.principal,
                    delegated,
                    "backend delegation below recorded principal"
                );
            }
        }
        let now = Utc::now();
        for &id in &exited {
            self.vaults[id].mark_inactive(now);
            warn!(id, validator = self.vaults[id].validator, "validator exited");
        }
        Ok(exited)
    }
}

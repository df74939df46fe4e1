//! Vault state machine
//!
//! One delegated stake position against a single validator identity.
//! A vault is exclusively owned by its strategy: methods here are pure
//! accounting transitions (validate, then mutate), and every backend
//! sub-call is issued by the strategy, which commits vault mutations only
//! after the backend has accepted the whole operation.
//!
//! ```plain
//! State machine:
//!
//!   Active ⇄ Unbonding ──► Empty (principal == 0 && queued == 0)
//!
//! Orthogonal axis: Active ↔ Inactive (validator exit), reachable from
//! any state, gating delegate/begin_unbond once entered.
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::types::{LifetimeCounter, VaultId};

/// A single delegated stake position
#[derive(Debug, Clone, Serialize)]
pub struct Vault {
    /// Validator/operator identity at the staking backend
    pub validator: String,
    /// Vault implementation reference stamped at creation/upgrade time
    pub implementation: String,
    /// Principal capacity ceiling
    pub max_deposits: u64,
    /// Capital actively delegated to the backend
    pub principal: u64,
    /// Capital in unbonding escrow, released by `complete_unbond`
    pub queued_withdrawals: u64,
    /// Lifetime rewards reported by the rewards source, monotonic
    pub lifetime_rewards_reported: LifetimeCounter,
    /// Lifetime rewards realized out (claimed or restaked)
    pub lifetime_rewards_claimed: u64,
    /// False once the validator has exited
    pub is_active: bool,
    pub is_unbonding: bool,
    pub unbonding_started_at: Option<DateTime<Utc>>,
    /// Exit-escrow start, stamped when the vault is marked inactive
    pub exited_at: Option<DateTime<Utc>>,
}

impl Vault {
    pub fn new(validator: String, implementation: String, max_deposits: u64) -> Self {
        Self {
            validator,
            implementation,
            max_deposits,
            principal: 0,
            queued_withdrawals: 0,
            lifetime_rewards_reported: LifetimeCounter::default(),
            lifetime_rewards_claimed: 0,
            is_active: true,
            is_unbonding: false,
            unbonding_started_at: None,
            exited_at: None,
        }
    }

    /// Rewards accrued but not yet realized (reported − claimed)
    pub fn rewards(&self) -> u64 {
        self.lifetime_rewards_reported.get() - self.lifetime_rewards_claimed
    }

    /// Principal plus unrealized rewards
    pub fn deposits(&self) -> u64 {
        self.principal + self.rewards()
    }

    /// Logically destroyed: nothing left to account for
    pub fn is_empty(&self) -> bool {
        self.principal == 0 && self.queued_withdrawals == 0
    }

    /// Add delegated principal
    pub fn delegate(&mut self, id: VaultId, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        if !self.is_active {
            return Err(Error::VaultInactive(id));
        }
        if self.principal + amount > self.max_deposits {
            return Err(Error::VaultCapExceeded {
                vault_id: id,
                attempted: self.principal + amount,
                cap: self.max_deposits,
            });
        }
        self.principal += amount;
        Ok(())
    }

    /// Move principal into unbonding escrow
    pub fn begin_unbond(&mut self, id: VaultId, amount: u64, now: DateTime<Utc>) -> Result<()> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        if !self.is_active {
            return Err(Error::VaultInactive(id));
        }
        if self.is_unbonding {
            return Err(Error::VaultAlreadyUnbonding(id));
        }
        if amount > self.principal {
            return Err(Error::InsufficientPrincipal {
                requested: amount,
                available: self.principal,
            });
        }
        self.principal -= amount;
        self.queued_withdrawals += amount;
        self.is_unbonding = true;
        self.unbonding_started_at = Some(now);
        Ok(())
    }

    /// Release escrowed withdrawals once the backend escrow has elapsed
    pub fn complete_unbond(
        &mut self,
        id: VaultId,
        now: DateTime<Utc>,
        escrow: Duration,
    ) -> Result<u64> {
        if !self.is_unbonding {
            return Err(Error::VaultNotUnbonding(id));
        }
        if !self.unbond_escrow_elapsed(now, escrow) {
            let started = self.unbonding_started_at.unwrap_or(now);
            return Err(Error::EscrowNotElapsed {
                vault_id: id,
                remaining_secs: (started + escrow - now).num_seconds(),
            });
        }
        let released = self.queued_withdrawals;
        self.queued_withdrawals = 0;
        self.is_unbonding = false;
        self.unbonding_started_at = None;
        Ok(released)
    }

    pub fn unbond_escrow_elapsed(&self, now: DateTime<Utc>, escrow: Duration) -> bool {
        match self.unbonding_started_at {
            Some(started) => now - started >= escrow,
            None => false,
        }
    }

    pub fn exit_escrow_elapsed(&self, now: DateTime<Utc>, escrow: Duration) -> bool {
        match self.exited_at {
            Some(exited) => now - exited >= escrow,
            None => false,
        }
    }

    /// Report a new lifetime reward value; returns the newly accrued delta
    pub fn report_lifetime_rewards(&mut self, value: u64) -> Result<u64> {
        self.lifetime_rewards_reported.increase_to(value)
    }

    /// Realize rewards out of the vault
    pub fn claim_rewards(&mut self, amount: u64) -> Result<()> {
        let available = self.rewards();
        if amount > available {
            return Err(Error::InsufficientRewards {
                requested: amount,
                available,
            });
        }
        self.lifetime_rewards_claimed += amount;
        Ok(())
    }

    /// Fold rewards back into principal (caller re-delegates at the backend)
    pub fn restake_rewards(&mut self, amount: u64) -> Result<()> {
        let available = self.rewards();
        if amount > available {
            return Err(Error::InsufficientRewards {
                requested: amount,
                available,
            });
        }
        self.lifetime_rewards_claimed += amount;
        self.principal += amount;
        Ok(())
    }

    /// Record a validator exit reported by the backend; idempotent.
    /// Principal becomes recoverable through the exit path after its own
    /// escrow, independent of the unbonding path.
    pub fn mark_inactive(&mut self, now: DateTime<Utc>) {
        if self.is_active {
            self.is_active = false;
            self.exited_at = Some(now);
        }
    }

    /// Drain recoverable balances after a validator exit
    pub fn drain_exited(&mut self, id: VaultId, now: DateTime<Utc>, exit_escrow: Duration) -> Result<u64> {
        if self.is_active {
            return Err(Error::ValidatorNotExited { vault_id: id });
        }
        if !self.exit_escrow_elapsed(now, exit_escrow) {
            let exited = self.exited_at.unwrap_or(now);
            return Err(Error::EscrowNotElapsed {
                vault_id: id,
                remaining_secs: (exited + exit_escrow - now).num_seconds(),
            });
        }
        let recovered = self.principal + self.queued_withdrawals;
        self.principal = 0;
        self.queued_withdrawals = 0;
        if self.is_unbonding {
            self.is_unbonding = false;
            self.unbonding_started_at = None;
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> Vault {
        Vault::new("val-0".to_string(), "vault-v1".to_string(), 1_000)
    }

    #[test]
    fn test_delegate_validations() {
        let mut vault = test_vault();
        assert!(matches!(vault.delegate(0, 0), Err(Error::ZeroAmount)));

        vault.delegate(0, 600).unwrap();
        assert_eq!(vault.principal, 600);

        // cap
        assert!(matches!(
            vault.delegate(0, 500),
            Err(Error::VaultCapExceeded { .. })
        ));

        vault.mark_inactive(Utc::now());
        assert!(matches!(vault.delegate(0, 1), Err(Error::VaultInactive(0))));
    }

    #[test]
    fn test_unbond_round_trip() {
        let mut vault = test_vault();
        vault.delegate(0, 500).unwrap();

        let start = Utc::now();
        vault.begin_unbond(0, 200, start).unwrap();
        assert_eq!(vault.principal, 300);
        assert_eq!(vault.queued_withdrawals, 200);
        assert!(vault.is_unbonding);

        // second unbond while one is in flight
        assert!(matches!(
            vault.begin_unbond(0, 10, start),
            Err(Error::VaultAlreadyUnbonding(0))
        ));

        // escrow not elapsed
        let escrow = Duration::days(28);
        assert!(matches!(
            vault.complete_unbond(0, start + Duration::days(1), escrow),
            Err(Error::EscrowNotElapsed { .. })
        ));

        let released = vault.complete_unbond(0, start + escrow, escrow).unwrap();
        assert_eq!(released, 200);
        assert!(!vault.is_unbonding);
        assert_eq!(vault.queued_withdrawals, 0);
    }

    #[test]
    fn test_unbond_more_than_principal() {
        let mut vault = test_vault();
        vault.delegate(0, 100).unwrap();
        assert!(matches!(
            vault.begin_unbond(0, 101, Utc::now()),
            Err(Error::InsufficientPrincipal { .. })
        ));
    }

    #[test]
    fn test_reward_accounting() {
        let mut vault = test_vault();
        vault.delegate(0, 100).unwrap();

        assert_eq!(vault.report_lifetime_rewards(30).unwrap(), 30);
        assert_eq!(vault.rewards(), 30);
        assert_eq!(vault.deposits(), 130);

        // decreasing report rejected, equal is a no-op
        assert!(vault.report_lifetime_rewards(29).is_err());
        assert_eq!(vault.report_lifetime_rewards(30).unwrap(), 0);

        vault.claim_rewards(10).unwrap();
        assert_eq!(vault.rewards(), 20);

        vault.restake_rewards(20).unwrap();
        assert_eq!(vault.rewards(), 0);
        assert_eq!(vault.principal, 120);

        assert!(matches!(
            vault.claim_rewards(1),
            Err(Error::InsufficientRewards { .. })
        ));
    }

    #[test]
    fn test_exit_path_independent_of_unbonding() {
        let mut vault = test_vault();
        vault.delegate(0, 400).unwrap();

        let start = Utc::now();
        vault.begin_unbond(0, 100, start).unwrap();
        vault.mark_inactive(start);
        assert!(!vault.is_active);

        let exit_escrow = Duration::days(7);
        // exit escrow gates recovery
        assert!(vault.drain_exited(0, start, exit_escrow).is_err());

        let recovered = vault
            .drain_exited(0, start + exit_escrow, exit_escrow)
            .unwrap();
        // both the remaining principal and the stranded unbonding escrow
        assert_eq!(recovered, 400);
        assert!(vault.is_empty());
        assert!(!vault.is_unbonding);
    }

    #[test]
    fn test_mark_inactive_idempotent() {
        let mut vault = test_vault();
        let first = Utc::now();
        vault.mark_inactive(first);
        let stamped = vault.exited_at;
        vault.mark_inactive(first + Duration::days(1));
        assert_eq!(vault.exited_at, stamped);
    }
}

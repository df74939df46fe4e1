//! Error types for the fund-flow core

use thiserror::Error;

use crate::types::VaultId;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the fund-flow core
#[derive(Error, Debug)]
pub enum Error {
    // Authorization errors
    #[error("Unauthorized caller '{caller}', expected {expected}")]
    Unauthorized {
        caller: String,
        expected: &'static str,
    },

    // Invariant-violation errors (caller bugs, whole call rejected)
    #[error("Array length mismatch: {left} vault ids vs {right} values")]
    LengthMismatch { left: usize, right: usize },

    #[error("Zero amount")]
    ZeroAmount,

    #[error("Vault not found: {0}")]
    VaultNotFound(VaultId),

    #[error("Vault ids must be strictly ascending")]
    VaultIdsNotAscending,

    #[error("Vault {0} is inactive")]
    VaultInactive(VaultId),

    #[error("Vault {0} is already unbonding")]
    VaultAlreadyUnbonding(VaultId),

    #[error("An unbonding cycle is already in flight ({0} vaults)")]
    UnbondingInProgress(usize),

    #[error("Vault {0} is not unbonding")]
    VaultNotUnbonding(VaultId),

    #[error("Claim must name the full unbonding set: expected {expected:?}, got {got:?}")]
    PartialClaim {
        expected: Vec<VaultId>,
        got: Vec<VaultId>,
    },

    #[error("Vault {vault_id} not empty: principal {principal}, queued {queued}")]
    VaultNotEmpty {
        vault_id: VaultId,
        principal: u64,
        queued: u64,
    },

    #[error("Insufficient principal: requested {requested}, available {available}")]
    InsufficientPrincipal { requested: u64, available: u64 },

    #[error("Insufficient queued tokens: requested {requested}, available {available}")]
    InsufficientQueued { requested: u64, available: u64 },

    #[error("Vault {vault_id} deposit cap exceeded: {attempted} > {cap}")]
    VaultCapExceeded {
        vault_id: VaultId,
        attempted: u64,
        cap: u64,
    },

    #[error("Total fee would exceed cap: {total_bps}bps > {cap_bps}bps")]
    FeeCapExceeded { total_bps: u64, cap_bps: u64 },

    #[error("Fee receiver not found at index {0}")]
    FeeNotFound(usize),

    // Policy-gate errors (expected, recoverable; re-check the should* view)
    #[error("Unbonding not needed: queued capital covers withdrawal demand")]
    UnbondNotNeeded,

    #[error("Unbonding rate limited: {remaining_secs}s until next window")]
    UnbondRateLimited { remaining_secs: i64 },

    #[error("Vault {vault_id} escrow not elapsed: {remaining_secs}s remaining")]
    EscrowNotElapsed {
        vault_id: VaultId,
        remaining_secs: i64,
    },

    #[error("Vault {vault_id} validator has not exited")]
    ValidatorNotExited { vault_id: VaultId },

    #[error("Reward delta {delta} exceeds drift bound {max}")]
    RewardDriftExceeded { delta: u64, max: u64 },

    #[error("Lifetime rewards decreased: reported {reported} < previous {previous}")]
    RewardsDecreased { reported: u64, previous: u64 },

    #[error("Reward claim {requested} exceeds accrued rewards {available}")]
    InsufficientRewards { requested: u64, available: u64 },

    // Backend-failure errors (whole operation rolled back, manual intervention)
    #[error("Staking backend error: {0}")]
    Backend(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Caller identity mismatch; fatal, never auto-retried.
    pub fn is_authorization(&self) -> bool {
        matches!(self, Error::Unauthorized { .. })
    }

    /// Caller bug: malformed arguments or an illegal transition.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Error::LengthMismatch { .. }
                | Error::ZeroAmount
                | Error::VaultNotFound(_)
                | Error::VaultIdsNotAscending
                | Error::VaultInactive(_)
                | Error::VaultAlreadyUnbonding(_)
                | Error::UnbondingInProgress(_)
                | Error::VaultNotUnbonding(_)
                | Error::PartialClaim { .. }
                | Error::VaultNotEmpty { .. }
                | Error::InsufficientPrincipal { .. }
                | Error::InsufficientQueued { .. }
                | Error::VaultCapExceeded { .. }
                | Error::FeeCapExceeded { .. }
                | Error::FeeNotFound(_)
                | Error::InsufficientRewards { .. }
        )
    }

    /// Expected operational condition; re-check the paired should* view
    /// before retrying.
    pub fn is_policy_gate(&self) -> bool {
        matches!(
            self,
            Error::UnbondNotNeeded
                | Error::UnbondRateLimited { .. }
                | Error::EscrowNotElapsed { .. }
                | Error::ValidatorNotExited { .. }
                | Error::RewardDriftExceeded { .. }
                | Error::RewardsDecreased { .. }
        )
    }

    /// External backend failure; the enclosing operation committed no
    /// accounting state, but the backend may need manual inspection.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Error::Backend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories_are_disjoint() {
        let samples = [
            Error::Unauthorized {
                caller: "x".into(),
                expected: "pool",
            },
            Error::ZeroAmount,
            Error::UnbondNotNeeded,
            Error::Backend("down".into()),
        ];
        for err in &samples {
            let flags = [
                err.is_authorization(),
                err.is_invariant_violation(),
                err.is_policy_gate(),
                err.is_backend_failure(),
            ];
            assert_eq!(flags.iter().filter(|f| **f).count(), 1, "{err}");
        }
    }
}

//! Shared types for the fund-flow core

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Index of a vault in its strategy's registry.
///
/// Ids are positional: removing a vault shifts every vault behind it down
/// by one, and the strategy adjusts its withdrawal cursor as part of the
/// same removal so the cursor keeps pointing at the same logical vault.
pub type VaultId = usize;

/// Basis-points denominator (10_000 = 100%)
pub const BASIS_POINTS: u64 = 10_000;

/// Maximum combined fee across all receivers (30%)
pub const MAX_TOTAL_FEE_BPS: u64 = 3_000;

/// Apply a basis-points ratio to an amount, rounding down.
pub fn apply_bps(amount: u64, bps: u64) -> u64 {
    ((amount as u128 * bps as u128) / BASIS_POINTS as u128) as u64
}

/// Monotonically non-decreasing lifetime counter.
///
/// Used for per-vault lifetime rewards reported by the rewards source.
/// The only mutating operation is `increase_to`, which rejects any value
/// below the stored one, so a decreasing report is unrepresentable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LifetimeCounter(u64);

impl LifetimeCounter {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Raise the counter to `value`, returning the increase.
    ///
    /// `value == current` is a valid no-op (delta 0); `value < current`
    /// is rejected without modifying the counter.
    pub fn increase_to(&mut self, value: u64) -> Result<u64> {
        if value < self.0 {
            return Err(Error::RewardsDecreased {
                reported: value,
                previous: self.0,
            });
        }
        let delta = value - self.0;
        self.0 = value;
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_bps() {
        assert_eq!(apply_bps(10_000, 1_000), 1_000); // 10%
        assert_eq!(apply_bps(333, 1_000), 33); // rounds down
        assert_eq!(apply_bps(u64::MAX, BASIS_POINTS), u64::MAX); // no overflow
        assert_eq!(apply_bps(123, 0), 0);
    }

    #[test]
    fn test_lifetime_counter_monotonic() {
        let mut counter = LifetimeCounter::default();
        assert_eq!(counter.increase_to(100).unwrap(), 100);
        assert_eq!(counter.increase_to(100).unwrap(), 0); // equal is a no-op
        assert_eq!(counter.increase_to(150).unwrap(), 50);
        assert!(counter.increase_to(149).is_err());
        assert_eq!(counter.get(), 150); // untouched by the rejected report
    }
}

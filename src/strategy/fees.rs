//! Fee schedule
//!
//! Each fee receiver takes a basis-points share of positive reward
//! deltas realized by `update_deposits`. The combined share is capped to
//! bound dilution of pool depositors.

use serde::Serialize;

use crate::config::FeeConfig;
use crate::error::{Error, Result};
use crate::types::{apply_bps, MAX_TOTAL_FEE_BPS};

#[derive(Debug, Clone, Serialize)]
pub struct Fee {
    pub receiver: String,
    pub basis_points: u64,
}

/// Ordered list of fee receivers with a 30% combined cap
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeeSchedule {
    fees: Vec<Fee>,
}

impl FeeSchedule {
    pub fn from_config(configs: &[FeeConfig]) -> Result<Self> {
        let mut schedule = Self::default();
        for fee in configs {
            schedule.add(fee.receiver.clone(), fee.basis_points)?;
        }
        Ok(schedule)
    }

    pub fn total_bps(&self) -> u64 {
        self.fees.iter().map(|f| f.basis_points).sum()
    }

    pub fn receivers(&self) -> &[Fee] {
        &self.fees
    }

    pub fn add(&mut self, receiver: String, basis_points: u64) -> Result<()> {
        if basis_points == 0 {
            return Err(Error::ZeroAmount);
        }
        let total = self.total_bps() + basis_points;
        if total > MAX_TOTAL_FEE_BPS {
            return Err(Error::FeeCapExceeded {
                total_bps: total,
                cap_bps: MAX_TOTAL_FEE_BPS,
            });
        }
        self.fees.push(Fee {
            receiver,
            basis_points,
        });
        Ok(())
    }

    /// Replace the entry at `index`; a zero share deletes it
    pub fn update(&mut self, index: usize, receiver: String, basis_points: u64) -> Result<()> {
        if index >= self.fees.len() {
            return Err(Error::FeeNotFound(index));
        }
        if basis_points == 0 {
            self.fees.remove(index);
            return Ok(());
        }
        let total = self.total_bps() - self.fees[index].basis_points + basis_points;
        if total > MAX_TOTAL_FEE_BPS {
            return Err(Error::FeeCapExceeded {
                total_bps: total,
                cap_bps: MAX_TOTAL_FEE_BPS,
            });
        }
        self.fees[index] = Fee {
            receiver,
            basis_points,
        };
        Ok(())
    }

    /// Split a positive reward delta into per-receiver amounts
    pub fn split(&self, delta: u64) -> Vec<(String, u64)> {
        self.fees
            .iter()
            .map(|f| (f.receiver.clone(), apply_bps(delta, f.basis_points)))
            .filter(|(_, amount)| *amount > 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_enforced_on_add_and_update() {
        let mut schedule = FeeSchedule::default();
        schedule.add("treasury".to_string(), 2_000).unwrap();
        schedule.add("operators".to_string(), 1_000).unwrap();
        assert_eq!(schedule.total_bps(), 3_000); // exactly at cap is fine

        // any further addition exceeds the cap
        assert!(matches!(
            schedule.add("extra".to_string(), 1),
            Err(Error::FeeCapExceeded { .. })
        ));

        // an update pushing past the cap is also rejected
        assert!(matches!(
            schedule.update(1, "operators".to_string(), 1_001),
            Err(Error::FeeCapExceeded { .. })
        ));

        // shrinking within the cap works
        schedule.update(1, "operators".to_string(), 500).unwrap();
        assert_eq!(schedule.total_bps(), 2_500);
    }

    #[test]
    fn test_zero_share_deletes() {
        let mut schedule = FeeSchedule::default();
        schedule.add("a".to_string(), 100).unwrap();
        schedule.add("b".to_string(), 200).unwrap();

        schedule.update(0, "a".to_string(), 0).unwrap();
        assert_eq!(schedule.receivers().len(), 1);
        assert_eq!(schedule.receivers()[0].receiver, "b");

        assert!(matches!(
            schedule.update(5, "x".to_string(), 1),
            Err(Error::FeeNotFound(5))
        ));
    }

    #[test]
    fn test_split_rounds_down_and_drops_dust() {
        let mut schedule = FeeSchedule::default();
        schedule.add("treasury".to_string(), 1_000).unwrap(); // 10%
        schedule.add("operators".to_string(), 5).unwrap(); // 0.05%

        let shares = schedule.split(100);
        // 10% of 100 = 10; 0.05% of 100 rounds to zero and is dropped
        assert_eq!(shares, vec![("treasury".to_string(), 10)]);
    }
}

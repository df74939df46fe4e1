//! stakeflow — accounting and fund-flow orchestration core for a
//! liquid-staking pool
//!
//! Pooled deposits fan out across delegated stake positions (vaults),
//! each tied to one validator identity with its own capacity and
//! asynchronous unbonding delay. The strategy owns the accounting; the
//! fund-flow controller decides when to deploy, unbond, and harvest,
//! driven by an external caller on a fixed cadence.

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod pool;
pub mod strategy;
pub mod types;
pub mod vault;

// Re-export commonly used types
pub use config::Config;
pub use controller::FundFlowController;
pub use error::{Error, Result};
pub use strategy::StakeStrategy;
pub use vault::Vault;

//! External collaborator seams: accounting pool and withdrawal queue
//!
//! Share-ledger mechanics and user withdrawal batching live outside this
//! core; these traits are their interface boundary. The in-memory
//! implementations back the tests and the demo keeper loop.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;

/// Fee-crediting surface of the accounting pool.
///
/// Positive reward deltas realized by `update_deposits` are split among
/// fee receivers and credited here; the pool turns credits into shares.
#[async_trait]
pub trait SharePool: Send + Sync {
    async fn credit_fees(&self, receiver: &str, amount: u64) -> Result<()>;
}

/// Pending user withdrawal demand, read-only to this core except for the
/// settlement trigger fired after unbonded funds are reclaimed.
#[async_trait]
pub trait WithdrawalQueue: Send + Sync {
    /// Total demand currently waiting to be paid out
    async fn total_queued_withdrawals(&self) -> u64;

    /// Settle pending withdrawals against `available` queued capital;
    /// returns the amount actually paid out.
    async fn settle(&self, available: u64) -> Result<u64>;
}

/// SharePool impl that records credits, for tests and dry runs
#[derive(Default)]
pub struct RecordingPool {
    credits: Mutex<Vec<(String, u64)>>,
}

impl RecordingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn credits(&self) -> Vec<(String, u64)> {
        self.credits.lock().await.clone()
    }

    pub async fn total_credited(&self) -> u64 {
        self.credits.lock().await.iter().map(|(_, a)| a).sum()
    }
}

#[async_trait]
impl SharePool for RecordingPool {
    async fn credit_fees(&self, receiver: &str, amount: u64) -> Result<()> {
        info!(receiver, amount, "fee credited");
        self.credits.lock().await.push((receiver.to_string(), amount));
        Ok(())
    }
}

/// In-memory withdrawal queue for tests and dry runs
#[derive(Default)]
pub struct InMemoryQueue {
    queued: AtomicU64,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record new user withdrawal demand
    pub fn enqueue(&self, amount: u64) {
        self.queued.fetch_add(amount, Ordering::SeqCst);
    }
}

#[async_trait]
impl WithdrawalQueue for InMemoryQueue {
    async fn total_queued_withdrawals(&self) -> u64 {
        self.queued.load(Ordering::SeqCst)
    }

    async fn settle(&self, available: u64) -> Result<u64> {
        let queued = self.queued.load(Ordering::SeqCst);
        let paid = queued.min(available);
        self.queued.fetch_sub(paid, Ordering::SeqCst);
        info!(paid, remaining = queued - paid, "withdrawal queue settled");
        Ok(paid)
    }
}

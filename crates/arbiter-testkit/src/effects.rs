//! Deterministic effect handlers

use arbiter_core::{PhysicalTimeEffects, RandomEffects};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Clock that only moves when told to
#[derive(Debug)]
pub struct FixedTimeHandler {
    now: AtomicU64,
}

impl FixedTimeHandler {
    /// Clock frozen at `now_ms`
    pub fn new(now_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(now_ms),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl PhysicalTimeEffects for FixedTimeHandler {
    async fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Uid source counting up from a per-node prefix
///
/// The prefix occupies the high 64 bits, so nodes with distinct prefixes
/// never produce the same uid.
#[derive(Debug)]
pub struct SequentialRandom {
    prefix: u64,
    counter: AtomicU64,
}

impl SequentialRandom {
    /// Source for the node identified by `prefix`
    pub fn new(prefix: u64) -> Self {
        Self {
            prefix,
            counter: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl RandomEffects for SequentialRandom {
    async fn random_uuid(&self) -> Uuid {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Uuid::from_u128((u128::from(self.prefix) << 64) | u128::from(n))
    }
}

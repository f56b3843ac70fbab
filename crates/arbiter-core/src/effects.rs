//! Time and randomness effect traits
//!
//! The dispute engine never reads the system clock or an RNG directly. It
//! goes through these traits so tests can substitute deterministic handlers.
//!
//! # Architecture
//!
//! - `PhysicalTimeEffects`: wall-clock milliseconds for timestamps
//! - `RandomEffects`: fresh uids for messages and envelopes
//!
//! The `System*` handlers are the production implementations.

use crate::identifiers::MessageUid;
use async_trait::async_trait;
use rand::RngCore;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Wall-clock time source
#[async_trait]
pub trait PhysicalTimeEffects: Send + Sync {
    /// Milliseconds since the unix epoch
    async fn now_ms(&self) -> u64;
}

/// Randomness source
#[async_trait]
pub trait RandomEffects: Send + Sync {
    /// A fresh random UUID
    async fn random_uuid(&self) -> Uuid;

    /// A fresh message uid
    async fn new_message_uid(&self) -> MessageUid {
        MessageUid::from_uuid(self.random_uuid().await)
    }
}

/// System clock handler
#[derive(Debug, Clone, Default)]
pub struct SystemTimeHandler;

impl SystemTimeHandler {
    /// Create a new system time handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PhysicalTimeEffects for SystemTimeHandler {
    async fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }
}

/// Thread-local RNG handler
#[derive(Debug, Clone, Default)]
pub struct SystemRandomHandler;

impl SystemRandomHandler {
    /// Create a new system random handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RandomEffects for SystemRandomHandler {
    async fn random_uuid(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn system_random_produces_distinct_uids() {
        let random = SystemRandomHandler::new();
        let a = random.new_message_uid().await;
        let b = random.new_message_uid().await;
        assert_ne!(a, b);
        assert_eq!(a.uuid().get_version_num(), 4);
    }

    #[tokio::test]
    async fn system_time_is_after_epoch() {
        assert!(SystemTimeHandler::new().now_ms().await > 0);
    }
}

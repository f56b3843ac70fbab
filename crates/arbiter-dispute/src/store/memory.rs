use super::DisputeStore;
use crate::errors::StoreError;
use arbiter_core::Dispute;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Store that keeps the latest snapshot in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Vec<Dispute>>,
    requests: AtomicUsize,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with disputes, as if loaded from disk
    pub fn with_disputes(disputes: Vec<Dispute>) -> Self {
        Self {
            saved: Mutex::new(disputes),
            requests: AtomicUsize::new(0),
        }
    }

    /// Latest saved snapshot
    pub fn saved(&self) -> Vec<Dispute> {
        self.saved.lock().clone()
    }

    /// Number of persistence requests received
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DisputeStore for MemoryStore {
    async fn read_all(&self) -> Result<Vec<Dispute>, StoreError> {
        Ok(self.saved())
    }

    fn request_persistence(&self, snapshot: Vec<Dispute>) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        *self.saved.lock() = snapshot;
    }

    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

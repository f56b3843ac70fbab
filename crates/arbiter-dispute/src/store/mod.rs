//! Dispute persistence
//!
//! The dispute list hands the store a full snapshot after every committed
//! mutation. Stores are free to coalesce: callers must not assume the
//! snapshot is durable when `request_persistence` returns. `flush` forces
//! any pending snapshot out.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use crate::errors::StoreError;
use arbiter_core::Dispute;
use async_trait::async_trait;

/// Persistence collaborator for one role-scoped dispute list
#[async_trait]
pub trait DisputeStore: Send + Sync {
    /// Load every stored dispute; used once at startup
    async fn read_all(&self) -> Result<Vec<Dispute>, StoreError>;

    /// Schedule a snapshot for writing; may be batched or debounced
    fn request_persistence(&self, snapshot: Vec<Dispute>);

    /// Write any pending snapshot now
    async fn flush(&self) -> Result<(), StoreError>;
}

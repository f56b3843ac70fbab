//! JSON file store with debounced writes
//!
//! Requests replace a single pending snapshot and wake a background
//! flusher. The flusher waits out the debounce window, then writes
//! whatever snapshot is pending at that moment, so a burst of mutations
//! costs one write. Writes go to a temp file that is renamed over the
//! target.

use super::DisputeStore;
use crate::errors::StoreError;
use arbiter_core::Dispute;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

struct FileInner {
    path: PathBuf,
    debounce: Duration,
    pending: Mutex<Option<Vec<Dispute>>>,
    notify: Notify,
    write_lock: tokio::sync::Mutex<()>,
    writes: AtomicUsize,
    shutdown: AtomicBool,
}

impl FileInner {
    async fn write_pending(&self) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(snapshot) = self.pending.lock().take() else {
            return Ok(false);
        };
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Serialization {
            message: e.to_string(),
        })?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| StoreError::Io {
                message: format!("writer task failed: {e}"),
            })??;
        self.writes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            path = %self.path.display(),
            disputes = snapshot.len(),
            "persisted dispute list"
        );
        Ok(true)
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io = |e: std::io::Error| StoreError::Io {
        message: format!("{}: {e}", path.display()),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes).map_err(io)?;
    std::fs::rename(&tmp, path).map_err(io)
}

async fn run_flusher(inner: Arc<FileInner>) {
    loop {
        inner.notify.notified().await;
        if !inner.debounce.is_zero() {
            tokio::time::sleep(inner.debounce).await;
        }
        if let Err(err) = inner.write_pending().await {
            tracing::error!(
                path = %inner.path.display(),
                error = %err,
                "failed to persist dispute list"
            );
        }
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
    }
}

/// Dispute list persisted as a JSON array
pub struct JsonFileStore {
    inner: Arc<FileInner>,
}

impl JsonFileStore {
    /// Open a store at `path` and start its flusher
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: impl Into<PathBuf>, debounce: Duration) -> Self {
        let inner = Arc::new(FileInner {
            path: path.into(),
            debounce,
            pending: Mutex::new(None),
            notify: Notify::new(),
            write_lock: tokio::sync::Mutex::new(()),
            writes: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        });
        tokio::spawn(run_flusher(inner.clone()));
        Self { inner }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Number of completed writes
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::Relaxed)
    }
}

impl Drop for JsonFileStore {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }
}

#[async_trait]
impl DisputeStore for JsonFileStore {
    async fn read_all(&self) -> Result<Vec<Dispute>, StoreError> {
        let path = self.inner.path.clone();
        let bytes = tokio::task::spawn_blocking(move || match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io {
                message: format!("{}: {e}", path.display()),
            }),
        })
        .await
        .map_err(|e| StoreError::Io {
            message: format!("reader task failed: {e}"),
        })??;

        match bytes {
            None => Ok(Vec::new()),
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
                message: e.to_string(),
            }),
        }
    }

    fn request_persistence(&self, snapshot: Vec<Dispute>) {
        *self.inner.pending.lock() = Some(snapshot);
        self.inner.notify.notify_one();
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.inner.write_pending().await.map(|_| ())
    }
}

//! Per-content-hash async mutexes serializing BlockInfo read-modify-write cycles.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Lock table keyed by content hash. Entries exist only while held or awaited.
#[derive(Debug, Clone, Default)]
pub struct HashLocks {
    table: Arc<LockTable>,
}

/// Holds the lock for one hash until dropped.
#[derive(Debug)]
pub struct HashGuard {
    guard: Option<OwnedMutexGuard<()>>,
    hash: String,
    table: Arc<LockTable>,
}

impl HashLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `hash`.
    ///
    /// Dropping the returned future before it resolves prunes the table entry
    /// like releasing a held guard does.
    pub async fn lock(&self, hash: &str) -> HashGuard {
        // Declared before the wait: on cancellation the pending acquire drops
        // first, then this guard's Drop sees the true reference count.
        let mut held = HashGuard {
            guard: None,
            hash: hash.to_string(),
            table: Arc::clone(&self.table),
        };
        let mutex = self
            .table
            .entry(hash.to_string())
            .or_default()
            .value()
            .clone();
        let acquire = mutex.lock_owned();
        held.guard = Some(acquire.await);
        held
    }

    /// Number of hashes currently locked or awaited
    pub fn active(&self) -> usize {
        self.table.len()
    }
}

impl Drop for HashGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table still references the mutex: nobody holds or awaits it.
        self.table
            .remove_if(&self.hash, |_, m| Arc::strong_count(m) == 1);
    }
}

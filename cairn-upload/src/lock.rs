use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::UploadId;

type LockTable = DashMap<UploadId, Arc<Mutex<()>>>;

/// Per-upload mutual exclusion.
///
/// Chunk handling, finalize and cancel for one upload id are serialised;
/// different ids never contend. Entries disappear once nobody holds or
/// waits on them.
#[derive(Default, Clone)]
pub struct UploadLocks {
    table: Arc<LockTable>,
}

impl UploadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub async fn acquire(&self, id: &UploadId) -> UploadLockGuard {
        // Clone under the shard lock so a concurrent release sees our handle.
        let mutex = self
            .table
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;
        UploadLockGuard {
            guard: Some(guard),
            table: self.table.clone(),
            id: id.clone(),
        }
    }

    /// Number of ids currently locked or awaited.
    pub fn active(&self) -> usize {
        self.table.len()
    }
}

/// Held for the duration of one read-modify-persist cycle.
pub struct UploadLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
    id: UploadId,
}

impl UploadLockGuard {
    pub fn upload_id(&self) -> &UploadId {
        &self.id
    }
}

impl Drop for UploadLockGuard {
    fn drop(&mut self) {
        // Release the mutex first so its Arc count reflects only the table
        // and any waiters.
        drop(self.guard.take());
        self.table
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

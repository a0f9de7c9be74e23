//! Per-stream read/delete coordination
//!
//! Archive reads hold a shared lease on their stream until the last byte is
//! produced; deletion takes the exclusive lease. A reader therefore sees
//! either the whole stream or none of it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::StreamId;

/// Shared hold on a stream; dropping it releases the stream for deletion
#[derive(Debug)]
pub struct ReadLease {
    _guard: OwnedRwLockReadGuard<()>,
}

/// Exclusive hold on a stream, taken for deletion
#[derive(Debug)]
pub struct DeleteLease {
    _guard: OwnedRwLockWriteGuard<()>,
}

/// Table of per-stream locks.
///
/// Entries are weak so the table only holds streams with a live lease.
#[derive(Default)]
pub struct StreamLocks {
    locks: Mutex<HashMap<StreamId, Weak<RwLock<()>>>>,
}

impl StreamLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, stream: StreamId) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = locks.get(&stream).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, weak| weak.strong_count() > 0);
        let lock = Arc::new(RwLock::new(()));
        locks.insert(stream, Arc::downgrade(&lock));
        lock
    }

    /// Wait for a shared lease; blocks only while the stream is being deleted
    pub async fn read(&self, stream: StreamId) -> ReadLease {
        ReadLease {
            _guard: self.lock_for(stream).read_owned().await,
        }
    }

    /// Wait for an exclusive lease; blocks until in-flight reads finish
    pub async fn delete(&self, stream: StreamId) -> DeleteLease {
        DeleteLease {
            _guard: self.lock_for(stream).write_owned().await,
        }
    }

    /// Number of streams with a live lease
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|weak| weak.strong_count() > 0).count()
    }
}

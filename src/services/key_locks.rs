//! Per-key mutual exclusion for operations on the same `bucket/key`, plus a
//! per-bucket tree lock that keeps directory creation and pruning apart.
//!
//! Locks are created lazily on first use. Idle entries (no holder, no
//! waiter) are pruned once a table grows past `PRUNE_THRESHOLD`.
//!
//! Ordering: a key lock is always taken before the tree lock of its bucket.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::{
    Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};

const PRUNE_THRESHOLD: usize = 1024;

pub type KeyGuard = OwnedMutexGuard<()>;
pub type TreeShared = OwnedRwLockReadGuard<()>;
pub type TreeExclusive = OwnedRwLockWriteGuard<()>;

type Table<L> = Arc<Mutex<HashMap<String, Arc<L>>>>;

#[derive(Clone, Default)]
pub struct KeyLocks {
    table: Table<AsyncMutex<()>>,
    trees: Table<RwLock<()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a single object. Held across payload and record updates.
    pub async fn lock_object(&self, bucket: &str, key: &str) -> KeyGuard {
        self.lock(format!("{bucket}/{key}")).await
    }

    /// Lock a bucket record. Object keys are never empty, so `bucket/` does
    /// not collide with any object entry.
    pub async fn lock_bucket(&self, bucket: &str) -> KeyGuard {
        self.lock(format!("{bucket}/")).await
    }

    /// Held while creating directories or files inside a bucket's trees.
    /// Any number of holders may share it.
    pub async fn share_tree(&self, bucket: &str) -> TreeShared {
        entry(&self.trees, bucket.to_string()).read_owned().await
    }

    /// Held while removing empty directories from a bucket's trees.
    pub async fn own_tree(&self, bucket: &str) -> TreeExclusive {
        entry(&self.trees, bucket.to_string()).write_owned().await
    }

    async fn lock(&self, id: String) -> KeyGuard {
        entry(&self.table, id).lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn entry<L: Default>(table: &Table<L>, id: String) -> Arc<L> {
    let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
    if table.len() >= PRUNE_THRESHOLD {
        table.retain(|_, l| Arc::strong_count(l) > 1);
    }
    table.entry(id).or_default().clone()
}

//! Per-digest locks
//!
//! Serializes the lookup -> store -> register section for one digest while
//! letting uploads of different content proceed in parallel. Entries are
//! dropped once nobody holds or waits on them.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::digest::ContentDigest;

/// Held for the duration of one digest's critical section
pub type DigestGuard = OwnedMutexGuard<()>;

#[derive(Clone, Default)]
pub struct DigestLocks {
    inner: Arc<Mutex<HashMap<ContentDigest, Weak<AsyncMutex<()>>>>>,
}

impl DigestLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a digest
    pub async fn lock(&self, digest: &ContentDigest) -> DigestGuard {
        let lock = {
            let mut table = self.inner.lock();
            table.retain(|_, weak| weak.strong_count() > 0);

            match table.get(digest).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(AsyncMutex::new(()));
                    table.insert(digest.clone(), Arc::downgrade(&lock));
                    lock
                }
            }
        };

        lock.lock_owned().await
    }

    /// Number of digests currently locked or awaited
    pub fn active(&self) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

// ABOUTME: Per-destination run lock so concurrent exports to one target serialize
// ABOUTME: Keyed by normalized host:port/database; the owned guard releases on drop

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held for the duration of one run; dropping it releases the target.
pub type RunGuard = OwnedMutexGuard<()>;

/// Registry of run locks, one per connection target.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry shared by every export in this process.
    pub fn global() -> &'static LockRegistry {
        static GLOBAL: OnceLock<LockRegistry> = OnceLock::new();
        GLOBAL.get_or_init(LockRegistry::new)
    }

    /// Wait for exclusive access to `target`.
    pub async fn acquire(&self, target: &str) -> RunGuard {
        let lock = self.lock_for(target);
        if lock.try_lock().is_err() {
            tracing::info!("Waiting for another export to {} to finish", target);
        }
        lock.lock_owned().await
    }

    fn lock_for(&self, target: &str) -> Arc<AsyncMutex<()>> {
        // A poisoned map still holds valid Arcs
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map holds idle locks; guards and waiters hold their own Arc
        locks.retain(|key, lock| key == target || Arc::strong_count(lock) > 1);
        locks
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

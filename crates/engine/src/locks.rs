use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held while an action runs against one target.
pub struct TargetGuard<'a> {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    owner: &'a TargetLocks,
}

impl Drop for TargetGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map's own Arc is the only one left once nobody waits.
        self.owner.locks.remove_if(&self.key, |_, m| Arc::strong_count(m) == 1);
    }
}

/// One async mutex per target key, created on demand.
#[derive(Debug, Default)]
pub struct TargetLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TargetLocks {
    pub fn new() -> Self { Self::default() }

    pub async fn acquire(&self, key: &str) -> TargetGuard<'_> {
        let m = self.locks.entry(key.to_string()).or_default().clone();
        let guard = m.lock_owned().await;
        TargetGuard { key: key.to_string(), guard: Some(guard), owner: self }
    }

    pub fn len(&self) -> usize { self.locks.len() }

    pub fn is_empty(&self) -> bool { self.locks.is_empty() }
}

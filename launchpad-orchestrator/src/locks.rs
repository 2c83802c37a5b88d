use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// Per-resource serialization point: at most one coordinator invocation
/// mutates a given resource id at a time.
#[derive(Clone, Default)]
pub struct IdLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl IdLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `id` is free and hold it until the guard drops.
    pub async fn lock(&self, id: &str) -> IdGuard {
        let mutex = {
            let mut map = lock_map(&self.inner);
            map.entry(id.to_string()).or_default().clone()
        };

        let guard = mutex.lock_owned().await;

        IdGuard {
            id: id.to_string(),
            locks: self.inner.clone(),
            guard: Some(guard),
        }
    }

    /// Number of ids currently held or awaited.
    pub fn len(&self) -> usize {
        lock_map(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_map(inner: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct IdGuard {
    id: String,
    locks: Arc<Mutex<LockMap>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdGuard {
    fn drop(&mut self) {
        let mut map = lock_map(&self.locks);
        self.guard.take();

        // Only the map still references the mutex: nobody is waiting.
        if map
            .get(&self.id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            map.remove(&self.id);
        }
    }
}

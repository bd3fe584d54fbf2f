use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

/// Per-key async serialization. Work queued under the same key runs one at a
/// time in the order it was queued; different keys never block each other.
pub struct KeyedLock<K> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLock<K> {
    pub fn new() -> Self {
        Self { slots: Mutex::new(HashMap::new()) }
    }

    pub async fn run<F, T>(&self, key: K, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
        };

        // tokio's Mutex hands the lock out in FIFO order.
        let out = {
            let _guard = slot.lock().await;
            work.await
        };

        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        drop(slot);
        if slots.get(&key).is_some_and(|s| Arc::strong_count(s) == 1) {
            slots.remove(&key);
        }
        out
    }

    pub fn active_keys(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLock<K> {
    fn default() -> Self {
        Self::new()
    }
}

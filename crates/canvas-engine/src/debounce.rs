//! Per-key debouncing of persisted writes.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

struct Slot {
    generation: u64,
    task: JoinHandle<()>,
}

/// Runs the most recent job scheduled for a key once the key has been quiet
/// for `delay`. Earlier jobs for the same key are dropped unrun.
pub struct Debouncer<K> {
    delay: Duration,
    slots: Arc<Mutex<HashMap<K, Slot>>>,
    generation: Mutex<u64>,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slots: Arc::new(Mutex::new(HashMap::new())),
            generation: Mutex::new(0),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule `job` for `key`, superseding any job still waiting for it.
    /// Must be called inside a tokio runtime.
    pub fn schedule<F>(&self, key: K, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = {
            let mut next = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        let delay = self.delay;
        let shared = self.slots.clone();
        let task_key = key.clone();

        // Held until the new slot is registered.
        let mut slots = self.slots();
        let task = tokio::spawn(async move {
            let slots = shared;
            tokio::time::sleep(delay).await;
            {
                let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
                match slots.get(&task_key) {
                    Some(slot) if slot.generation == generation => {
                        slots.remove(&task_key);
                    }
                    _ => return,
                }
            }
            job.await;
        });

        if let Some(previous) = slots.insert(key, Slot { generation, task }) {
            previous.task.abort();
        }
    }

    /// Number of jobs still waiting out their delay.
    pub fn pending(&self) -> usize {
        self.slots().len()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.slots().contains_key(key)
    }

    /// Abort every waiting job.
    pub fn cancel_all(&self) {
        for (_, slot) in self.slots().drain() {
            slot.task.abort();
        }
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, slot) in slots.drain() {
            slot.task.abort();
        }
    }
}

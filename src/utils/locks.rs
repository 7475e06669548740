use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, PoisonError},
};

/// A table of independent locks, one per key.
///
/// Callers holding locks for different keys never contend with each other;
/// the table's own mutex is only held long enough to look up a slot and is
/// never held across an `.await`.
pub struct LockTable<K, L> {
    slots: Mutex<HashMap<K, Arc<L>>>,
}

impl<K, L> LockTable<K, L>
where
    K: Eq + Hash + Clone,
    L: Default,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the lock for `key`, creating it on first use.
    pub fn slot(&self, key: &K) -> Arc<L> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Drops slots nobody is holding or waiting on.
    pub fn prune(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, L> Default for LockTable<K, L>
where
    K: Eq + Hash + Clone,
    L: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

//! Write-once, read-many maps with at most one resolution in flight per key.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Error, Result};

enum Slot<V> {
    Pending,
    Ready(Arc<V>),
}

pub(crate) struct SingleFlight<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
    done: Condvar,
}

impl<K: Eq + Hash + Clone, V> SingleFlight<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            done: Condvar::new(),
        }
    }

    /// Return the cached value for `key`, resolving it with `init` if absent.
    ///
    /// Concurrent callers for a key under resolution wait for that
    /// resolution. A failed resolution leaves no entry behind, so a later
    /// call tries again.
    pub(crate) fn get_or_try_init(&self, key: &K, init: impl FnOnce() -> Result<V>) -> Result<Arc<V>> {
        {
            let mut slots = self.slots.lock().map_err(|_| Error::Poisoned)?;
            loop {
                match slots.get(key) {
                    Some(Slot::Ready(v)) => return Ok(Arc::clone(v)),
                    Some(Slot::Pending) => {
                        slots = self.done.wait(slots).map_err(|_| Error::Poisoned)?;
                    }
                    None => {
                        slots.insert(key.clone(), Slot::Pending);
                        break;
                    }
                }
            }
        }

        let guard = PendingGuard { map: self, key };
        let result = init().map(Arc::new);
        if let Ok(v) = &result {
            let mut slots = self.slots.lock().map_err(|_| Error::Poisoned)?;
            slots.insert(key.clone(), Slot::Ready(Arc::clone(v)));
            self.done.notify_all();
            std::mem::forget(guard);
        }
        result
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<V>> {
        let slots = self.slots.lock().ok()?;
        match slots.get(key) {
            Some(Slot::Ready(v)) => Some(Arc::clone(v)),
            _ => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots
            .lock()
            .map(|s| s.values().filter(|v| matches!(v, Slot::Ready(_))).count())
            .unwrap_or(0)
    }

    /// Drop every resolved entry.
    pub(crate) fn clear(&self) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.retain(|_, v| matches!(v, Slot::Pending));
        }
    }
}

/// Clears a pending slot when its resolution fails or unwinds.
struct PendingGuard<'a, K: Eq + Hash, V> {
    map: &'a SingleFlight<K, V>,
    key: &'a K,
}

impl<K: Eq + Hash, V> Drop for PendingGuard<'_, K, V> {
    fn drop(&mut self) {
        let mut slots = match self.map.slots.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.remove(self.key);
        self.map.done.notify_all();
    }
}

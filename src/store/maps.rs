use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;

/// KvMaps is the node's key/value map plus the per-key sequence of the last replicated write
/// applied. Both live under one lock so a replicated write updates them together.
#[derive(Default)]
pub(crate) struct KvMaps {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    values: HashMap<String, String>,
    sequences: HashMap<String, u64>,
}

/// Outcome of applying a replicated write.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum ForwardOutcome {
    Applied,
    Stale { recorded: u64 },
}

impl KvMaps {
    pub(crate) fn get(&self, key: &str) -> Option<String> {
        self.read().values.get(key).cloned()
    }

    pub(crate) fn put(&self, key: String, value: String) {
        self.write().values.insert(key, value);
    }

    pub(crate) fn apply_forwarded(&self, key: String, value: String, sequence: u64) -> ForwardOutcome {
        let mut inner = self.write();
        if let Some(&recorded) = inner.sequences.get(&key) {
            if sequence < recorded {
                return ForwardOutcome::Stale { recorded };
            }
        }
        inner.sequences.insert(key.clone(), sequence);
        inner.values.insert(key, value);
        ForwardOutcome::Applied
    }

    /// Returns the number of pairs inserted.
    pub(crate) fn insert_absent<I>(&self, pairs: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut inner = self.write();
        let mut inserted = 0;
        for (key, value) in pairs {
            if let Entry::Vacant(slot) = inner.values.entry(key) {
                slot.insert(value);
                inserted += 1;
            }
        }
        inserted
    }

    /// Copies out every pair. Writes landing after the copy are not included.
    pub(crate) fn snapshot(&self) -> (Vec<String>, Vec<String>) {
        let inner = self.read();
        let mut keys = Vec::with_capacity(inner.values.len());
        let mut values = Vec::with_capacity(inner.values.len());
        for (key, value) in inner.values.iter() {
            keys.push(key.clone());
            values.push(value.clone());
        }
        (keys, values)
    }

    pub(crate) fn len(&self) -> usize {
        self.read().values.len()
    }

    #[cfg(test)]
    pub(crate) fn sequence(&self, key: &str) -> Option<u64> {
        self.read().sequences.get(key).copied()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("KvMaps read lock poison")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("KvMaps write lock poison")
    }
}

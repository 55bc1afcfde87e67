use crate::access::Gradient;
use crate::types::Key;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

struct CacheEntry<P, G> {
    param: P,
    grad: G,
}

/// Worker-side mirror of the keys active in one mini-batch.
///
/// Each key holds a pulled parameter snapshot and an accumulating local
/// gradient. A parameter and its gradient are created together by
/// `init_keys`, so a gradient can never exist without its parameter.
///
/// Structure (insert/clear) is guarded by one coarse reader/writer lock;
/// individual entries carry their own mutex so training threads touching
/// different keys never contend. Within a mini-batch each key is touched
/// by at most one training instance at a time, so the entry locks are
/// almost always uncontended.
pub struct LocalCache<P, G> {
    entries: RwLock<HashMap<Key, Mutex<CacheEntry<P, G>>>>,
}

impl<P, G> Default for LocalCache<P, G>
where
    P: Default + Clone + Send + Sync,
    G: Gradient,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P, G> LocalCache<P, G>
where
    P: Default + Clone + Send + Sync,
    G: Gradient,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a zero-initialized parameter and gradient for every key.
    ///
    /// Takes the exclusive lock once for the whole set. Keys already
    /// present are reset.
    pub fn init_keys(&self, keys: impl IntoIterator<Item = Key>) {
        let mut entries = self.entries.write();
        for key in keys {
            entries.insert(
                key,
                Mutex::new(CacheEntry {
                    param: P::default(),
                    grad: G::default(),
                }),
            );
        }
    }

    pub fn size(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Keys currently cached, in sorted order.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.entries.read().keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Run `f` on one key's parameter and gradient. Returns `None` when
    /// the key was not initialized for this mini-batch.
    pub fn with_entry<R>(&self, key: Key, f: impl FnOnce(&mut P, &mut G) -> R) -> Option<R> {
        let entries = self.entries.read();
        let entry = entries.get(&key)?;
        let mut entry = entry.lock();
        let entry = &mut *entry;
        Some(f(&mut entry.param, &mut entry.grad))
    }

    /// Visit every entry under the shared structural lock.
    pub fn for_each(&self, mut f: impl FnMut(Key, &mut P, &mut G)) {
        let entries = self.entries.read();
        for (key, entry) in entries.iter() {
            let mut entry = entry.lock();
            let entry = &mut *entry;
            f(*key, &mut entry.param, &mut entry.grad);
        }
    }

    /// Drop every entry. Called after each mini-batch's push.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

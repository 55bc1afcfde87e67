use crate::types::Key;
use parking_lot::RwLock;
use std::collections::HashMap;

/// One lock-guarded partition of a server's key space.
///
/// The shard is the unit of concurrency granularity: concurrent reads
/// share the lock, while inserts and folds serialize on it. A
/// `SparseTable` owns a fixed array of these.
pub(crate) struct TableShard<V> {
    data: RwLock<HashMap<Key, V>>,
}

impl<V: Clone> TableShard<V> {
    pub(crate) fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a key under the shared lock, cloning the value out.
    pub(crate) fn find(&self, key: Key) -> Option<V> {
        self.data.read().get(&key).cloned()
    }

    /// Insert or overwrite under the exclusive lock.
    pub(crate) fn assign(&self, key: Key, value: V) {
        self.data.write().insert(key, value);
    }

    /// Run `f` against the stored value under the exclusive lock.
    ///
    /// Returns `None` when the key is absent; the closure result
    /// otherwise. The closure never observes a partially applied update
    /// from another thread.
    pub(crate) fn update<R>(&self, key: Key, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.data.write().get_mut(&key).map(f)
    }

    pub(crate) fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Visit every entry under the shared lock.
    pub(crate) fn for_each(&self, mut f: impl FnMut(Key, &V)) {
        for (k, v) in self.data.read().iter() {
            f(*k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_find_miss() {
        let shard: TableShard<f32> = TableShard::new();
        assert_eq!(shard.find(1), None);
        assert_eq!(shard.len(), 0);
    }

    #[test]
    fn test_assign_overwrites() {
        let shard = TableShard::new();
        shard.assign(1, 10i64);
        shard.assign(1, 20i64);
        assert_eq!(shard.find(1), Some(20));
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn test_update_absent_key() {
        let shard: TableShard<i64> = TableShard::new();
        assert_eq!(shard.update(5, |v| *v += 1), None);
    }

    #[test]
    fn test_concurrent_updates_all_land() {
        let shard = Arc::new(TableShard::new());
        shard.assign(7, 0i64);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let shard = Arc::clone(&shard);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    shard.update(7, |v| *v += 1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(shard.find(7), Some(8000));
    }
}

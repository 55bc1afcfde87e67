use crate::access::method::{PullAccess, PushAccess};
use crate::table::SparseTable;
use crate::types::Key;
use std::sync::Arc;

/// Glue between a `SparseTable` and a pull policy.
///
/// Unseen keys are lazily initialized on first pull. When two pulls miss
/// the same key concurrently, both call `init_param` and both assign;
/// the table's exclusive-lock assign makes the last writer win. That
/// race is tolerated: initialization is typically randomized and only
/// affects first touch.
pub struct PullAgent<P: PullAccess> {
    table: Arc<SparseTable<P::Param>>,
    method: Arc<P>,
}

impl<P: PullAccess> Clone for PullAgent<P> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            method: Arc::clone(&self.method),
        }
    }
}

impl<P: PullAccess> PullAgent<P> {
    pub fn new(table: Arc<SparseTable<P::Param>>, method: Arc<P>) -> Self {
        Self { table, method }
    }

    /// Server-side parameter query: find-or-init, then project.
    pub fn pull(&self, key: Key) -> P::Pull {
        let param = match self.table.find(key) {
            Some(param) => param,
            None => {
                let param = self.method.init_param(key);
                self.table.assign(key, param.clone());
                param
            }
        };
        self.method.pull_value(key, &param)
    }
}

/// Glue between a `SparseTable` and a push policy.
pub struct PushAgent<U: PushAccess> {
    table: Arc<SparseTable<U::Param>>,
    method: Arc<U>,
}

impl<U: PushAccess> Clone for PushAgent<U> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            method: Arc::clone(&self.method),
        }
    }
}

impl<U: PushAccess> PushAgent<U> {
    pub fn new(table: Arc<SparseTable<U::Param>>, method: Arc<U>) -> Self {
        Self { table, method }
    }

    /// Fold one pushed gradient into the stored parameter, atomically
    /// with respect to the owning shard's lock.
    ///
    /// # Panics
    ///
    /// Panics when `key` was never initialized by a prior pull. The push
    /// protocol guarantees every pushed key was pulled earlier in the
    /// same mini-batch, so an unseen key here is a programming error,
    /// not a recoverable condition.
    pub fn push(&self, key: Key, grad: &U::Grad) {
        let applied = self
            .table
            .update(key, |param| self.method.fold(key, param, grad));
        assert!(
            applied.is_some(),
            "push to uninitialized key {key}: every key must be pulled before it is pushed"
        );
    }
}

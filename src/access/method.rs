use crate::types::Key;

/// Worker-side gradient accumulator for one key across a mini-batch.
pub trait Gradient: Default + Clone + Send + Sync + 'static {
    /// Merge another accumulator into this one.
    fn accumulate(&mut self, other: &Self);

    /// Collapse the accumulated contributions into one averaged update,
    /// e.g. divide by the contribution count. Called once, right before
    /// the gradient is pushed.
    fn normalize(&mut self);
}

/// Pull-side policy: how a parameter is born, how it is projected into
/// the value sent to a worker, and how a worker folds that value into
/// its local cache.
///
/// Supplied by the training application; the core consumes it
/// generically through `PullAgent` and `WorkerNode`.
pub trait PullAccess: Send + Sync + 'static {
    /// Authoritative server-side parameter.
    type Param: Clone + Send + Sync + 'static;

    /// Projection of a parameter shipped to a puller. Recomputed per
    /// request; no independent identity.
    type Pull: Clone + Send + Sync + 'static;

    /// Worker-side cached form of a pulled value.
    type Local: Default + Clone + Send + Sync + 'static;

    /// Produce the initial parameter for an unseen key.
    ///
    /// May be called more than once for the same key when concurrent
    /// pulls miss together; whichever resulting assign lands last wins.
    fn init_param(&self, key: Key) -> Self::Param;

    /// Project a stored parameter into the value handed to a puller.
    fn pull_value(&self, key: Key, param: &Self::Param) -> Self::Pull;

    /// Apply a pulled value into a worker's local parameter slot.
    fn apply_pull(&self, key: Key, local: &mut Self::Local, pull: &Self::Pull);
}

/// Push-side policy: how a pushed gradient is folded into the stored
/// parameter (the update rule).
pub trait PushAccess: Send + Sync + 'static {
    /// Must match the pull side's `Param` for the same table.
    type Param: Clone + Send + Sync + 'static;

    type Grad: Gradient;

    /// Fold one gradient into the parameter. Runs under the owning
    /// shard's exclusive lock, so it is atomic with respect to every
    /// other fold and pull on that shard.
    fn fold(&self, key: Key, param: &mut Self::Param, grad: &Self::Grad);
}

use crate::access::{Gradient, PullAccess};
use crate::cache::LocalCache;
use crate::error::{Result, SparrowError};
use crate::route::{KeyRouter, Route};
use crate::task::TaskPool;
use crate::transport::{RpcClient, Service, OP_PULL, OP_PUSH};
use crate::types::{Key, NodeId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One worker node: the local cache of active keys plus the client
/// side of the pull/push protocol.
///
/// A training pass drives it batch by batch: `cache().init_keys(..)`
/// with the keys the batch touches, `pull()`, accumulate gradients into
/// the cache, `push()`. The worker's own listener carries no handlers
/// today; it exists so every node in the route is addressable.
pub struct WorkerNode<P, G>
where
    P: PullAccess,
    G: Gradient,
{
    node_id: NodeId,
    cache: Arc<LocalCache<P::Local, G>>,
    method: Arc<P>,
    route: Route,
    router: KeyRouter,
    client: RpcClient,
    pool: TaskPool,
    _service: Service,
}

impl<P, G> WorkerNode<P, G>
where
    P: PullAccess,
    G: Gradient,
{
    pub fn new(
        node_id: NodeId,
        service: Service,
        method: Arc<P>,
        route: Route,
        router: KeyRouter,
        async_threads: usize,
    ) -> Result<Self> {
        Ok(Self {
            node_id,
            cache: Arc::new(LocalCache::new()),
            method,
            route,
            router,
            client: RpcClient::new(),
            pool: TaskPool::new(async_threads)?,
            _service: service,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The mini-batch cache. Returned as the shared handle so training
    /// tasks on the pool can hold their own clone.
    pub fn cache(&self) -> &Arc<LocalCache<P::Local, G>> {
        &self.cache
    }

    /// Pool for fork-join phases of a training pass (key gathering,
    /// per-line training).
    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    /// Fetch fresh parameters for every cached key.
    ///
    /// Keys are grouped by owning server and requested in one batched
    /// call per server, in parallel; replies are applied to the cache
    /// through the access method's projection.
    pub fn pull(&self) -> Result<()>
    where
        P::Pull: DeserializeOwned,
    {
        let mut by_node: HashMap<NodeId, Vec<Key>> = HashMap::new();
        for key in self.cache.keys() {
            by_node.entry(self.router.owner_of(key)).or_default().push(key);
        }
        let replies = self.fan_out(by_node, OP_PULL)?;

        let mut applied = 0usize;
        for reply in replies {
            let pairs: Vec<(Key, P::Pull)> = bincode::deserialize(&reply)
                .map_err(|e| SparrowError::DecodeFailed(e.to_string()))?;
            for (key, pull) in pairs {
                let hit = self
                    .cache
                    .with_entry(key, |local, _| self.method.apply_pull(key, local, &pull));
                if hit.is_some() {
                    applied += 1;
                } else {
                    tracing::warn!(key, "pulled a key no longer cached; dropped");
                }
            }
        }
        tracing::debug!(node_id = self.node_id, applied, "pull complete");
        Ok(())
    }

    /// Send every cached gradient to its owning server and empty the
    /// cache.
    ///
    /// Each gradient is normalized before it leaves, so a key touched
    /// by many training instances contributes an average, not a sum
    /// scaled by its frequency.
    pub fn push(&self) -> Result<()>
    where
        G: Serialize,
    {
        let mut by_node: HashMap<NodeId, Vec<(Key, G)>> = HashMap::new();
        let mut pushed = 0usize;
        self.cache.for_each(|key, _, grad| {
            let mut outgoing = grad.clone();
            outgoing.normalize();
            by_node
                .entry(self.router.owner_of(key))
                .or_default()
                .push((key, outgoing));
            pushed += 1;
        });
        self.fan_out(by_node, OP_PUSH)?;
        self.cache.clear();
        tracing::debug!(node_id = self.node_id, pushed, "push complete");
        Ok(())
    }

    /// One batched request per server node, sent from parallel threads.
    fn fan_out<T: Serialize + Send>(
        &self,
        by_node: HashMap<NodeId, T>,
        op: u16,
    ) -> Result<Vec<Vec<u8>>> {
        let mut requests = Vec::with_capacity(by_node.len());
        for (node, body) in by_node {
            let addr = self.route.addr(node)?;
            let payload =
                bincode::serialize(&body).map_err(|e| SparrowError::EncodeFailed(e.to_string()))?;
            requests.push((addr, payload));
        }

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(requests.len());
            for (addr, payload) in requests {
                handles.push(scope.spawn(move || self.client.request(addr, op, payload)));
            }
            let mut replies = Vec::with_capacity(handles.len());
            for handle in handles {
                let reply = handle
                    .join()
                    .map_err(|_| SparrowError::transport("request thread panicked"))??;
                replies.push(reply);
            }
            Ok(replies)
        })
    }

    /// Worker shutdown is just a log line; the cache holds nothing
    /// durable.
    pub fn finalize(&self) {
        tracing::info!(
            node_id = self.node_id,
            cached = self.cache.size(),
            "worker finalized"
        );
    }
}

use crate::access::{PullAccess, PullAgent, PushAccess, PushAgent};
use crate::error::{Result, SparrowError};
use crate::route::KeyRouter;
use crate::table::{DumpValue, SparseTable};
use crate::transport::{Service, OP_PULL, OP_PUSH};
use crate::types::{Key, NodeId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// One server node: the local table partition plus the RPC surface
/// that exposes it.
///
/// Every pull and push for a key this node owns lands here; the access
/// methods decide what a pull returns and how a gradient folds in.
pub struct ServerNode<P, U>
where
    P: PullAccess,
    U: PushAccess<Param = P::Param>,
{
    node_id: NodeId,
    table: Arc<SparseTable<P::Param>>,
    router: KeyRouter,
    service: Service,
    _pull: std::marker::PhantomData<P>,
    _push: std::marker::PhantomData<U>,
}

impl<P, U> ServerNode<P, U>
where
    P: PullAccess,
    U: PushAccess<Param = P::Param>,
    P::Pull: Serialize,
    U::Grad: DeserializeOwned,
{
    /// Wire the pull and push handlers onto `service` and take
    /// ownership of the table partition.
    pub fn new(
        node_id: NodeId,
        service: Service,
        table: Arc<SparseTable<P::Param>>,
        pull_method: Arc<P>,
        push_method: Arc<U>,
        router: KeyRouter,
    ) -> Self {
        let pull_agent = PullAgent::new(Arc::clone(&table), pull_method);
        service.register(
            OP_PULL,
            Arc::new(move |payload| {
                let keys: Vec<Key> = bincode::deserialize(payload)
                    .map_err(|e| SparrowError::DecodeFailed(e.to_string()))?;
                let pairs: Vec<(Key, P::Pull)> = keys
                    .into_iter()
                    .map(|key| (key, pull_agent.pull(key)))
                    .collect();
                bincode::serialize(&pairs).map_err(|e| SparrowError::EncodeFailed(e.to_string()))
            }),
        );

        let push_agent = PushAgent::new(Arc::clone(&table), push_method);
        service.register(
            OP_PUSH,
            Arc::new(move |payload| {
                let grads: Vec<(Key, U::Grad)> = bincode::deserialize(payload)
                    .map_err(|e| SparrowError::DecodeFailed(e.to_string()))?;
                for (key, grad) in grads {
                    push_agent.push(key, &grad);
                }
                Ok(Vec::new())
            }),
        );

        Self {
            node_id,
            table,
            router,
            service,
            _pull: std::marker::PhantomData,
            _push: std::marker::PhantomData,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn addr(&self) -> &str {
        self.service.local_addr()
    }

    pub fn table(&self) -> &SparseTable<P::Param> {
        &self.table
    }
}

impl<P, U> ServerNode<P, U>
where
    P: PullAccess,
    U: PushAccess<Param = P::Param>,
    P::Param: DumpValue,
{
    /// Write this node's partition out at shutdown. With no path the
    /// records go to stdout.
    pub fn finalize(&self, dump_path: Option<&Path>) -> Result<()> {
        let records = match dump_path {
            Some(path) => self.table.dump_to_path(path)?,
            None => {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                self.table.dump(&mut out)?
            }
        };
        tracing::info!(
            node_id = self.node_id,
            records,
            "server partition dumped"
        );
        Ok(())
    }

    /// Load a previous dump, keeping only the keys this node owns
    /// under the current routing. A dump taken with a different server
    /// count re-partitions cleanly this way.
    pub fn restore(&self, path: &Path) -> Result<usize> {
        let node_id = self.node_id;
        let router = self.router;
        let loaded = self
            .table
            .restore_from_path(path, move |key| router.owner_of(key) == node_id)?;
        tracing::info!(node_id, loaded, "server partition restored");
        Ok(loaded)
    }
}

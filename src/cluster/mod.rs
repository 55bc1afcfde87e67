//! Cluster membership: bootstrap, the per-process server and worker
//! roles, and coordinated shutdown.

pub mod exchange;
mod server;
mod worker;

pub use exchange::{BootstrapSeed, Exchange, LocalExchange, TcpExchange};
pub use server::ServerNode;
pub use worker::WorkerNode;

use crate::access::{PullAccess, PushAccess};
use crate::config::SparrowConfig;
use crate::error::{Result, SparrowError};
use crate::route::{hosts_server, hosts_worker, KeyRouter, RankEndpoints, Route};
use crate::table::{DumpValue, SparseTable};
use crate::transport::Service;
use crate::types::ProcessRank;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// One process's view of the whole cluster.
///
/// Joining binds this process's listeners, trades endpoints with every
/// peer through the exchange, replays the deterministic route
/// construction, stands up whichever roles this rank hosts, and holds
/// a final barrier so no process starts training before every service
/// is reachable.
///
/// Worker precedes server in the struct so the drop order closes
/// outbound connections before the serving side stops.
pub struct Cluster<P, U>
where
    P: PullAccess,
    U: PushAccess<Param = P::Param>,
{
    rank: ProcessRank,
    world: u32,
    route: Route,
    router: KeyRouter,
    worker: Option<WorkerNode<P, U::Grad>>,
    server: Option<ServerNode<P, U>>,
    exchange: Box<dyn Exchange>,
}

impl<P, U> Cluster<P, U>
where
    P: PullAccess,
    U: PushAccess<Param = P::Param>,
    P::Pull: Serialize + DeserializeOwned,
    U::Grad: Serialize + DeserializeOwned,
{
    /// Bootstrap this process into a world of `world` ranks.
    pub fn join(
        config: &SparrowConfig,
        rank: ProcessRank,
        world: u32,
        mut exchange: Box<dyn Exchange>,
        pull_method: Arc<P>,
        push_method: Arc<U>,
    ) -> Result<Self> {
        config.validate()?;
        let (server_num, worker_num) = role_counts(config, world)?;

        // Both listeners are bound before the gather so every rank can
        // contribute a complete endpoint pair; the one a role never
        // claims is dropped after the route is built.
        let server_service = Service::bind(&config.listen_host, config.server_service_threads)?;
        let worker_service = Service::bind(&config.listen_host, config.worker_service_threads)?;

        let local = RankEndpoints {
            rank,
            worker_addr: worker_service.local_addr().to_string(),
            server_addr: server_service.local_addr().to_string(),
        };
        let endpoints = exchange.all_gather(local)?;
        let route = Route::build(&endpoints, server_num, worker_num)?;
        let router = KeyRouter::new(server_num)?;

        let ids = route
            .ids_of_rank(rank)
            .ok_or(SparrowError::GatherIncomplete { rank })?;

        let server = if hosts_server(rank, world, server_num) {
            let node_id = ids
                .server
                .ok_or(SparrowError::GatherIncomplete { rank })?;
            let table = Arc::new(SparseTable::new(config.shard_num)?);
            Some(ServerNode::new(
                node_id,
                server_service,
                table,
                Arc::clone(&pull_method),
                push_method,
                router,
            ))
        } else {
            None
        };

        let worker = if hosts_worker(rank, world, worker_num) {
            let node_id = ids
                .worker
                .ok_or(SparrowError::GatherIncomplete { rank })?;
            Some(WorkerNode::new(
                node_id,
                worker_service,
                pull_method,
                route.clone(),
                router,
                config.async_threads,
            )?)
        } else {
            None
        };

        // No rank proceeds until every rank's services are wired up.
        exchange.barrier()?;
        tracing::info!(
            rank,
            world,
            server = server.is_some(),
            worker = worker.is_some(),
            "cluster bootstrap complete"
        );

        Ok(Self {
            rank,
            world,
            route,
            router,
            worker,
            server,
            exchange,
        })
    }

    pub fn rank(&self) -> ProcessRank {
        self.rank
    }

    pub fn world(&self) -> u32 {
        self.world
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn router(&self) -> &KeyRouter {
        &self.router
    }

    pub fn server(&self) -> Option<&ServerNode<P, U>> {
        self.server.as_ref()
    }

    pub fn worker(&self) -> Option<&WorkerNode<P, U::Grad>> {
        self.worker.as_ref()
    }

    /// Block until every rank in the world reaches this point.
    pub fn barrier(&mut self) -> Result<()> {
        self.exchange.barrier()
    }
}

impl<P, U> Cluster<P, U>
where
    P: PullAccess,
    U: PushAccess<Param = P::Param>,
    P::Pull: Serialize + DeserializeOwned,
    U::Grad: Serialize + DeserializeOwned,
    P::Param: DumpValue,
{
    /// Coordinated shutdown: workers stop producing, then servers dump,
    /// with barriers so no stage starts before the previous one ended
    /// everywhere.
    pub fn finalize(&mut self, dump_path: Option<&Path>) -> Result<()> {
        self.exchange.barrier()?;
        if let Some(worker) = &self.worker {
            worker.finalize();
        }
        self.exchange.barrier()?;
        if let Some(server) = &self.server {
            server.finalize(dump_path)?;
        }
        self.exchange.barrier()?;
        tracing::info!(rank = self.rank, "cluster finalized");
        Ok(())
    }

    /// Load a previous dump into this rank's server partition, then
    /// hold everyone until every partition is loaded.
    pub fn restore(&mut self, path: &Path) -> Result<usize> {
        let loaded = match &self.server {
            Some(server) => server.restore(path)?,
            None => 0,
        };
        self.exchange.barrier()?;
        Ok(loaded)
    }
}

fn role_counts(config: &SparrowConfig, world: u32) -> Result<(u32, u32)> {
    if world == 0 {
        return Err(SparrowError::EmptyRole {
            servers: 0,
            workers: 0,
        });
    }
    if !config.split_roles {
        return Ok((world, world));
    }
    let server_num = config.server_num as u32;
    if server_num == 0 || server_num >= world {
        return Err(SparrowError::EmptyRole {
            servers: server_num,
            workers: world.saturating_sub(server_num),
        });
    }
    Ok((server_num, world - server_num))
}

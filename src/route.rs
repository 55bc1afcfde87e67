//! Cluster-wide node table and deterministic key→node routing.

use crate::error::{Result, SparrowError};
use crate::hash::key_hash;
use crate::types::{Key, NodeId, ProcessRank};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The listen addresses one process contributes to the all-to-all
/// exchange: one endpoint per hostable role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEndpoints {
    pub rank: ProcessRank,
    pub worker_addr: String,
    pub server_addr: String,
}

/// Node ids assigned to one rank during route construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankIds {
    pub server: Option<NodeId>,
    pub worker: Option<NodeId>,
}

/// Immutable id→address table shared by every process in the cluster.
///
/// Built once at bootstrap by replaying the globally gathered endpoint
/// list in rank order: every rank that hosts a server registers a server
/// id (monotonically increasing from 0), every rank that hosts a worker
/// registers a worker id (monotonically decreasing from `NodeId::MAX`).
/// Because each process replays the identical loop over the identical
/// data, all processes end up with an identical table without further
/// communication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    addrs: HashMap<NodeId, String>,
    server_ids: Vec<NodeId>,
    worker_ids: Vec<NodeId>,
    assignments: HashMap<ProcessRank, RankIds>,
}

/// True when `rank` hosts a server role: the first `server_num` ranks do.
pub fn hosts_server(rank: ProcessRank, world: u32, server_num: u32) -> bool {
    debug_assert!(rank < world);
    rank < server_num
}

/// True when `rank` hosts a worker role: the last `worker_num` ranks do.
pub fn hosts_worker(rank: ProcessRank, world: u32, worker_num: u32) -> bool {
    debug_assert!(rank < world);
    world - rank <= worker_num
}

impl Route {
    /// Replay the deterministic registration loop over gathered
    /// endpoints.
    ///
    /// `endpoints` may arrive in any order; ranks must be exactly
    /// `0..world` with no gaps.
    pub fn build(endpoints: &[RankEndpoints], server_num: u32, worker_num: u32) -> Result<Self> {
        if server_num == 0 || worker_num == 0 {
            return Err(SparrowError::EmptyRole {
                servers: server_num,
                workers: worker_num,
            });
        }

        let world = endpoints.len() as u32;
        let mut by_rank: Vec<Option<&RankEndpoints>> = vec![None; endpoints.len()];
        for ep in endpoints {
            let slot = by_rank
                .get_mut(ep.rank as usize)
                .ok_or(SparrowError::GatherIncomplete { rank: ep.rank })?;
            *slot = Some(ep);
        }

        let mut route = Route {
            addrs: HashMap::new(),
            server_ids: Vec::new(),
            worker_ids: Vec::new(),
            assignments: HashMap::new(),
        };

        for rank in 0..world {
            let ep = by_rank[rank as usize]
                .ok_or(SparrowError::GatherIncomplete { rank })?;
            let mut ids = RankIds {
                server: None,
                worker: None,
            };
            if hosts_server(rank, world, server_num) {
                ids.server = Some(route.register_server(ep.server_addr.clone()));
            }
            if hosts_worker(rank, world, worker_num) {
                ids.worker = Some(route.register_worker(ep.worker_addr.clone()));
            }
            tracing::debug!(
                rank,
                server_id = ?ids.server,
                worker_id = ?ids.worker,
                "registered rank in route"
            );
            route.assignments.insert(rank, ids);
        }

        Ok(route)
    }

    fn register_server(&mut self, addr: String) -> NodeId {
        let id = self.server_ids.len() as NodeId;
        self.server_ids.push(id);
        self.addrs.insert(id, addr);
        id
    }

    fn register_worker(&mut self, addr: String) -> NodeId {
        let id = NodeId::MAX - self.worker_ids.len() as NodeId;
        self.worker_ids.push(id);
        self.addrs.insert(id, addr);
        id
    }

    /// Address of a node id.
    pub fn addr(&self, node: NodeId) -> Result<&str> {
        self.addrs
            .get(&node)
            .map(String::as_str)
            .ok_or(SparrowError::UnknownNode { node })
    }

    /// Ids assigned to a rank during construction.
    pub fn ids_of_rank(&self, rank: ProcessRank) -> Option<RankIds> {
        self.assignments.get(&rank).copied()
    }

    pub fn server_num(&self) -> u32 {
        self.server_ids.len() as u32
    }

    pub fn worker_num(&self) -> u32 {
        self.worker_ids.len() as u32
    }

    pub fn server_ids(&self) -> &[NodeId] {
        &self.server_ids
    }

    pub fn worker_ids(&self) -> &[NodeId] {
        &self.worker_ids
    }
}

/// Deterministic key→server-node routing.
///
/// A pure function of `(key, server_num)`: every process maps a key to
/// the same owning server node, forever.
#[derive(Debug, Clone, Copy)]
pub struct KeyRouter {
    server_num: u32,
}

impl KeyRouter {
    pub fn new(server_num: u32) -> Result<Self> {
        if server_num == 0 {
            return Err(SparrowError::InvalidConfig {
                name: "server_num",
                value: 0,
            });
        }
        Ok(Self { server_num })
    }

    /// Server node id owning `key`.
    pub fn owner_of(&self, key: Key) -> NodeId {
        (key_hash(key) % self.server_num as u64) as NodeId
    }

    pub fn server_num(&self) -> u32 {
        self.server_num
    }
}

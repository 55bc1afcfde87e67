pub mod access;
pub mod batch;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod hash;
pub mod route;
pub mod table;
pub mod task;
pub mod transport;
pub mod types;

pub use access::{Gradient, PullAccess, PullAgent, PushAccess, PushAgent};
pub use batch::MiniBatchReader;
pub use cache::LocalCache;
pub use cluster::{BootstrapSeed, Cluster, Exchange, LocalExchange, ServerNode, TcpExchange, WorkerNode};
pub use config::SparrowConfig;
pub use error::{Result, SparrowError};
pub use route::{KeyRouter, RankEndpoints, Route};
pub use table::{DumpValue, SparseTable};
pub use task::TaskPool;
pub use transport::{Message, RpcClient, Service};
pub use types::{Key, NodeId, ProcessRank, PROTOCOL_VERSION};

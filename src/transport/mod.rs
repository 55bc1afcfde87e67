//! Blocking TCP transport: framed messages, the RPC service, and the
//! client that talks to it.

pub mod client;
pub mod codec;
pub mod message;
pub mod service;

pub use client::RpcClient;
pub use message::Message;
pub use service::{Handler, Service};

/// Operation id for a batched parameter pull.
pub const OP_PULL: u16 = 1;
/// Operation id for a batched gradient push.
pub const OP_PUSH: u16 = 2;

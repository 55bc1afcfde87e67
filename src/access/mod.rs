//! Pull/push policy contracts and the agents that bind them to a table.

pub mod adagrad;
mod agent;
mod method;

pub use agent::{PullAgent, PushAgent};
pub use method::{Gradient, PullAccess, PushAccess};

/// Identifier of a stored parameter (word hash, sentence hash, feature id).
///
/// Keys are assumed roughly uniformly distributed; the same key hash
/// drives both shard selection inside a server and server-node selection
/// across the cluster.
pub type Key = u64;

/// Unique identifier for a node (a server or worker role endpoint).
///
/// Server ids are assigned counting up from 0, worker ids counting down
/// from `NodeId::MAX`, so the two ranges never collide.
pub type NodeId = u32;

/// Rank of a process in the cluster (0-indexed, as handed to bootstrap).
pub type ProcessRank = u32;

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_ranges_disjoint() {
        // Server ids grow from 0, worker ids shrink from the top; with any
        // realistic cluster size the ranges cannot meet.
        let server: NodeId = 1024;
        let worker: NodeId = NodeId::MAX - 1024;
        assert!(server < worker);
    }
}

use crate::route::RankEndpoints;
use serde::{Deserialize, Serialize};

/// Everything that crosses a connection, bootstrap and RPC alike.
///
/// Application payloads travel as opaque bincode bytes inside
/// `Request`/`Response`; the envelope stays fixed while user parameter
/// and gradient types vary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// First frame a joining process sends to the bootstrap seed.
    Hello {
        protocol_version: u16,
        rank: u32,
        endpoints: RankEndpoints,
    },
    /// Seed's broadcast of every member's endpoints once the world is
    /// complete.
    Gather { endpoints: Vec<RankEndpoints> },
    /// Barrier entry for one synchronization epoch.
    Barrier { epoch: u64 },
    /// Seed's release of one barrier epoch.
    BarrierAck { epoch: u64 },
    /// One RPC call: `op` selects the handler, `payload` is its
    /// argument encoding.
    Request {
        req_id: u64,
        op: u16,
        payload: Vec<u8>,
    },
    /// Reply to the request with the same `req_id`.
    Response { req_id: u64, payload: Vec<u8> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roundtrips_through_bincode() {
        let messages = vec![
            Message::Hello {
                protocol_version: 1,
                rank: 3,
                endpoints: RankEndpoints {
                    rank: 3,
                    worker_addr: "127.0.0.1:7001".into(),
                    server_addr: "127.0.0.1:8001".into(),
                },
            },
            Message::Barrier { epoch: 42 },
            Message::Request {
                req_id: 9,
                op: 1,
                payload: vec![1, 2, 3],
            },
            Message::Response {
                req_id: 9,
                payload: vec![],
            },
        ];
        for msg in messages {
            let bytes = bincode::serialize(&msg).unwrap();
            let back: Message = bincode::deserialize(&bytes).unwrap();
            assert_eq!(back, msg);
        }
    }
}

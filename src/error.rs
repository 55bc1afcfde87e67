use crate::types::{Key, NodeId, ProcessRank};

pub type Result<T> = std::result::Result<T, SparrowError>;

#[derive(Debug, thiserror::Error)]
pub enum SparrowError {
    #[error("invalid configuration: {name} = {value}")]
    InvalidConfig { name: &'static str, value: i64 },

    #[error("config file parse failed at line {line}: {reason}")]
    ConfigParse { line: usize, reason: String },

    #[error("node {node} not found in route")]
    UnknownNode { node: NodeId },

    #[error("protocol version mismatch: local={local}, remote={remote}")]
    ProtocolMismatch { local: u16, remote: u16 },

    #[error("message decode failed: {0}")]
    DecodeFailed(String),

    #[error("message encode failed: {0}")]
    EncodeFailed(String),

    #[error("frame of {len} bytes exceeds limit of {limit}")]
    FrameTooLarge { len: usize, limit: usize },

    #[error("no handler registered for op={op}")]
    HandlerNotRegistered { op: u16 },

    #[error("response id mismatch: sent {sent}, got {got}")]
    ResponseMismatch { sent: u64, got: u64 },

    #[error("bootstrap gather incomplete: rank {rank} missing from exchange")]
    GatherIncomplete { rank: ProcessRank },

    #[error("cluster needs at least one server and one worker (servers={servers}, workers={workers})")]
    EmptyRole { servers: u32, workers: u32 },

    #[error("dump record malformed at line {line}: {reason}")]
    DumpFormat { line: usize, reason: String },

    #[error("dump refers to key {key} with wrong field count: expected {expected}, got {got}")]
    DumpFieldCount {
        key: Key,
        expected: usize,
        got: usize,
    },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SparrowError {
    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = SparrowError::InvalidConfig {
            name: "shard_num",
            value: 0,
        };
        assert_eq!(e.to_string(), "invalid configuration: shard_num = 0");
    }

    #[test]
    fn test_transport_with_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let e = SparrowError::transport_with_source("connect to server 3", io);
        assert_eq!(e.to_string(), "transport error: connect to server 3");
        assert!(std::error::Error::source(&e).is_some());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port busy");
        let e: SparrowError = io.into();
        assert!(e.to_string().contains("port busy"));
    }

    #[test]
    fn test_all_variants_display() {
        let errors: Vec<SparrowError> = vec![
            SparrowError::InvalidConfig {
                name: "async_threads",
                value: -1,
            },
            SparrowError::ConfigParse {
                line: 3,
                reason: "missing value".into(),
            },
            SparrowError::UnknownNode { node: 7 },
            SparrowError::ProtocolMismatch {
                local: 1,
                remote: 2,
            },
            SparrowError::DecodeFailed("bad".into()),
            SparrowError::EncodeFailed("bad".into()),
            SparrowError::FrameTooLarge {
                len: 1 << 30,
                limit: 1 << 28,
            },
            SparrowError::HandlerNotRegistered { op: 9 },
            SparrowError::ResponseMismatch { sent: 1, got: 2 },
            SparrowError::GatherIncomplete { rank: 4 },
            SparrowError::EmptyRole {
                servers: 0,
                workers: 2,
            },
            SparrowError::DumpFormat {
                line: 10,
                reason: "no key".into(),
            },
            SparrowError::DumpFieldCount {
                key: 42,
                expected: 8,
                got: 7,
            },
            SparrowError::transport("peer gone"),
        ];
        for e in &errors {
            assert!(!e.to_string().is_empty(), "empty display for {e:?}");
        }
    }
}

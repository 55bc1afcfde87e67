use crate::error::{Result, SparrowError};
use crate::transport::codec::{read_message, write_message};
use crate::transport::message::Message;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Connection {
    stream: TcpStream,
}

impl Connection {
    fn open(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(|e| {
            SparrowError::transport_with_source(format!("failed to connect to {addr}"), e)
        })?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    fn call(&mut self, req_id: u64, op: u16, payload: Vec<u8>) -> Result<Vec<u8>> {
        write_message(
            &mut self.stream,
            &Message::Request {
                req_id,
                op,
                payload,
            },
        )?;
        match read_message(&mut self.stream)? {
            Some(Message::Response {
                req_id: got,
                payload,
            }) => {
                if got != req_id {
                    return Err(SparrowError::ResponseMismatch {
                        sent: req_id,
                        got,
                    });
                }
                Ok(payload)
            }
            Some(other) => Err(SparrowError::transport(format!(
                "unexpected reply to request: {other:?}"
            ))),
            None => Err(SparrowError::transport("connection closed before reply")),
        }
    }
}

/// Blocking RPC client with one cached connection per remote address.
///
/// Concurrent callers to the same address serialize on that address's
/// connection; callers to different addresses proceed in parallel. A
/// connection that fails a call is discarded so the next call redials.
pub struct RpcClient {
    connections: Mutex<HashMap<String, Arc<Mutex<Connection>>>>,
    next_req_id: AtomicU64,
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcClient {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_req_id: AtomicU64::new(1),
        }
    }

    /// Send one request and block for its response.
    pub fn request(&self, addr: &str, op: u16, payload: Vec<u8>) -> Result<Vec<u8>> {
        let conn = self.connection_for(addr)?;
        let req_id = self.next_req_id.fetch_add(1, Ordering::Relaxed);
        let result = conn.lock().call(req_id, op, payload);
        if result.is_err() {
            self.connections.lock().remove(addr);
        }
        result
    }

    fn connection_for(&self, addr: &str) -> Result<Arc<Mutex<Connection>>> {
        let mut connections = self.connections.lock();
        if let Some(conn) = connections.get(addr) {
            return Ok(Arc::clone(conn));
        }
        let conn = Arc::new(Mutex::new(Connection::open(addr)?));
        connections.insert(addr.to_string(), Arc::clone(&conn));
        Ok(conn)
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        // Shut the sockets down so the serving side sees EOF promptly.
        for conn in self.connections.lock().values() {
            let _ = conn.lock().stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

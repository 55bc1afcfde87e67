use crate::error::{Result, SparrowError};
use crate::task::TaskPool;
use crate::transport::codec::{read_message, write_message};
use crate::transport::message::Message;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Handler for one operation id: raw request payload in, raw response
/// payload out.
pub type Handler = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

struct Registry {
    handlers: RwLock<HashMap<u16, Handler>>,
    shutdown: AtomicBool,
}

/// Listens on a TCP port and dispatches request frames to registered
/// handlers on a thread pool.
///
/// One acceptor thread hands each connection to a pool task that serves
/// the connection until the peer closes it or shutdown is signaled. The
/// same service layout runs on servers (pull/push handlers) and workers
/// (reserved for future control traffic); the roles differ only in what
/// they register.
pub struct Service {
    registry: Arc<Registry>,
    local_addr: String,
    acceptor: Option<JoinHandle<()>>,
}

impl Service {
    /// Bind to an ephemeral port on `host` and start accepting with
    /// `threads` serving threads.
    pub fn bind(host: &str, threads: usize) -> Result<Self> {
        let listener = TcpListener::bind((host, 0)).map_err(|e| {
            SparrowError::transport_with_source(format!("failed to bind on {host}"), e)
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SparrowError::transport_with_source("no local address", e))?
            .to_string();
        listener.set_nonblocking(true)?;

        let registry = Arc::new(Registry {
            handlers: RwLock::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        });
        let pool = TaskPool::new(threads)?;

        let acceptor_registry = Arc::clone(&registry);
        let acceptor = std::thread::Builder::new()
            .name("sparrow-accept".into())
            .spawn(move || accept_loop(listener, acceptor_registry, pool))?;

        tracing::info!(addr = %local_addr, threads, "service listening");
        Ok(Self {
            registry,
            local_addr,
            acceptor: Some(acceptor),
        })
    }

    /// Register the handler for one operation id, replacing any
    /// previous one.
    pub fn register(&self, op: u16, handler: Handler) {
        self.registry.handlers.write().insert(op, handler);
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.registry.shutdown.store(true, Ordering::SeqCst);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
        tracing::debug!(addr = %self.local_addr, "service stopped");
    }
}

fn accept_loop(listener: TcpListener, registry: Arc<Registry>, pool: TaskPool) {
    while !registry.shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "connection accepted");
                let registry = Arc::clone(&registry);
                pool.spawn(move || {
                    if let Err(e) = serve_connection(stream, &registry) {
                        tracing::warn!(%peer, "connection closed with error: {e}");
                    }
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                tracing::warn!("accept failed: {e}");
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    }
    // Dropping the pool here joins the serving threads; connections
    // notice shutdown through their read timeouts.
}

fn serve_connection(mut stream: TcpStream, registry: &Registry) -> Result<()> {
    stream.set_nodelay(true)?;

    loop {
        if registry.shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        // Wait for the next frame with a short timeout so shutdown is
        // noticed on idle connections; once bytes are available, read
        // the whole frame blocking.
        stream.set_read_timeout(Some(Duration::from_millis(200)))?;
        let mut probe = [0u8; 1];
        match stream.peek(&mut probe) {
            Ok(0) => return Ok(()), // peer closed
            Ok(_) => {}
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(e) => return Err(e.into()),
        }
        stream.set_read_timeout(None)?;

        let message = match read_message(&mut stream)? {
            Some(message) => message,
            None => return Ok(()),
        };
        match message {
            Message::Request {
                req_id,
                op,
                payload,
            } => {
                let response = dispatch(registry, op, &payload)?;
                write_message(
                    &mut stream,
                    &Message::Response {
                        req_id,
                        payload: response,
                    },
                )?;
            }
            other => {
                return Err(SparrowError::transport(format!(
                    "unexpected message on service connection: {other:?}"
                )));
            }
        }
    }
}

fn dispatch(registry: &Registry, op: u16, payload: &[u8]) -> Result<Vec<u8>> {
    let handler = registry
        .handlers
        .read()
        .get(&op)
        .cloned()
        .ok_or(SparrowError::HandlerNotRegistered { op })?;
    // A panicking handler is an invariant violation (e.g. a push to a
    // never-pulled key). Letting it unwind would kill one pool thread
    // and leave the remote caller blocked on a response that never
    // comes; the whole process goes down instead.
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(payload))) {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(op, "request handler panicked; aborting");
            std::process::abort();
        }
    }
}

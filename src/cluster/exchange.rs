use crate::error::{Result, SparrowError};
use crate::route::RankEndpoints;
use crate::transport::codec::{read_message, write_message};
use crate::transport::message::Message;
use crate::types::{ProcessRank, PROTOCOL_VERSION};
use parking_lot::{Condvar, Mutex};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

/// The two collectives every process needs at bootstrap and shutdown:
/// one all-to-all endpoint gather, and a reusable full-world barrier.
pub trait Exchange: Send {
    /// Contribute this process's endpoints and receive everyone's.
    /// Blocks until the full world has contributed.
    fn all_gather(&mut self, local: RankEndpoints) -> Result<Vec<RankEndpoints>>;

    /// Block until every process in the world has entered this barrier.
    fn barrier(&mut self) -> Result<()>;
}

struct LocalShared {
    slots: Mutex<Vec<Option<RankEndpoints>>>,
    gathered: Condvar,
    barrier: Mutex<BarrierState>,
    released: Condvar,
}

struct BarrierState {
    arrived: u32,
    generation: u64,
}

/// In-process exchange for clusters whose ranks are threads of one
/// process. Used by tests and single-machine runs.
pub struct LocalExchange {
    shared: Arc<LocalShared>,
    world: u32,
}

impl LocalExchange {
    /// Create one handle per rank, all joined to the same world.
    pub fn group(world: u32) -> Vec<LocalExchange> {
        let shared = Arc::new(LocalShared {
            slots: Mutex::new(vec![None; world as usize]),
            gathered: Condvar::new(),
            barrier: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            released: Condvar::new(),
        });
        (0..world)
            .map(|_| LocalExchange {
                shared: Arc::clone(&shared),
                world,
            })
            .collect()
    }
}

impl Exchange for LocalExchange {
    fn all_gather(&mut self, local: RankEndpoints) -> Result<Vec<RankEndpoints>> {
        let rank = local.rank;
        let mut slots = self.shared.slots.lock();
        let slot = slots
            .get_mut(rank as usize)
            .ok_or(SparrowError::GatherIncomplete { rank })?;
        *slot = Some(local);
        if slots.iter().all(Option::is_some) {
            self.shared.gathered.notify_all();
        } else {
            self.shared
                .gathered
                .wait_while(&mut slots, |slots| slots.iter().any(Option::is_none));
        }
        Ok(slots.iter().flatten().cloned().collect())
    }

    fn barrier(&mut self) -> Result<()> {
        let mut state = self.shared.barrier.lock();
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.world {
            state.arrived = 0;
            state.generation += 1;
            self.shared.released.notify_all();
        } else {
            self.shared
                .released
                .wait_while(&mut state, |state| state.generation == generation);
        }
        Ok(())
    }
}

struct SeedShared {
    world: u32,
    barrier: Mutex<BarrierState>,
    released: Condvar,
}

/// Rendezvous point for TCP-bootstrapped clusters.
///
/// The seed accepts exactly `world` connections, reads each member's
/// `Hello`, broadcasts the gathered endpoint list, then keeps every
/// connection open to coordinate barrier epochs until members hang up.
pub struct BootstrapSeed;

impl BootstrapSeed {
    /// Bind on `host` and start the rendezvous. Returns the address
    /// members should dial and the handle to join after shutdown.
    pub fn spawn(host: &str, world: u32) -> Result<(String, JoinHandle<()>)> {
        let listener = TcpListener::bind((host, 0)).map_err(|e| {
            SparrowError::transport_with_source(format!("seed failed to bind on {host}"), e)
        })?;
        let addr = listener
            .local_addr()
            .map_err(|e| SparrowError::transport_with_source("no local address", e))?
            .to_string();

        let handle = std::thread::Builder::new()
            .name("sparrow-seed".into())
            .spawn(move || {
                if let Err(e) = run_seed(listener, world) {
                    tracing::error!("bootstrap seed failed: {e}");
                }
            })?;

        tracing::info!(%addr, world, "bootstrap seed listening");
        Ok((addr, handle))
    }
}

fn run_seed(listener: TcpListener, world: u32) -> Result<()> {
    let mut members: Vec<(ProcessRank, TcpStream)> = Vec::with_capacity(world as usize);
    let mut endpoints: Vec<RankEndpoints> = Vec::with_capacity(world as usize);

    for _ in 0..world {
        let (mut stream, peer) = listener.accept()?;
        stream.set_nodelay(true)?;
        match read_message(&mut stream)? {
            Some(Message::Hello {
                protocol_version,
                rank,
                endpoints: eps,
            }) => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(SparrowError::ProtocolMismatch {
                        local: PROTOCOL_VERSION,
                        remote: protocol_version,
                    });
                }
                tracing::debug!(%peer, rank, "member joined");
                members.push((rank, stream));
                endpoints.push(eps);
            }
            other => {
                return Err(SparrowError::transport(format!(
                    "expected Hello from {peer}, got {other:?}"
                )));
            }
        }
    }

    endpoints.sort_by_key(|ep| ep.rank);
    let gather = Message::Gather {
        endpoints: endpoints.clone(),
    };
    for (_, stream) in &mut members {
        write_message(stream, &gather)?;
    }
    tracing::info!(world, "endpoint gather complete");

    // From here each member connection only carries barrier traffic;
    // serve them until every member hangs up.
    let shared = Arc::new(SeedShared {
        world,
        barrier: Mutex::new(BarrierState {
            arrived: 0,
            generation: 0,
        }),
        released: Condvar::new(),
    });
    let mut handles = Vec::new();
    for (rank, stream) in members {
        let shared = Arc::clone(&shared);
        handles.push(
            std::thread::Builder::new()
                .name(format!("sparrow-seed-{rank}"))
                .spawn(move || {
                    if let Err(e) = serve_member(stream, &shared) {
                        tracing::warn!(rank, "seed member connection failed: {e}");
                    }
                })?,
        );
    }
    for handle in handles {
        let _ = handle.join();
    }
    tracing::info!("bootstrap seed done");
    Ok(())
}

fn serve_member(mut stream: TcpStream, shared: &SeedShared) -> Result<()> {
    loop {
        match read_message(&mut stream)? {
            Some(Message::Barrier { epoch }) => {
                let mut state = shared.barrier.lock();
                let generation = state.generation;
                state.arrived += 1;
                if state.arrived == shared.world {
                    state.arrived = 0;
                    state.generation += 1;
                    shared.released.notify_all();
                } else {
                    shared
                        .released
                        .wait_while(&mut state, |state| state.generation == generation);
                }
                drop(state);
                write_message(&mut stream, &Message::BarrierAck { epoch })?;
            }
            Some(other) => {
                return Err(SparrowError::transport(format!(
                    "expected Barrier, got {other:?}"
                )));
            }
            None => return Ok(()), // member left
        }
    }
}

/// Member-side exchange over a persistent connection to the seed.
pub struct TcpExchange {
    stream: TcpStream,
    rank: ProcessRank,
    epoch: u64,
}

impl TcpExchange {
    pub fn connect(seed_addr: &str, rank: ProcessRank) -> Result<Self> {
        let stream = TcpStream::connect(seed_addr).map_err(|e| {
            SparrowError::transport_with_source(format!("failed to reach seed at {seed_addr}"), e)
        })?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            rank,
            epoch: 0,
        })
    }
}

impl Exchange for TcpExchange {
    fn all_gather(&mut self, local: RankEndpoints) -> Result<Vec<RankEndpoints>> {
        write_message(
            &mut self.stream,
            &Message::Hello {
                protocol_version: PROTOCOL_VERSION,
                rank: self.rank,
                endpoints: local,
            },
        )?;
        match read_message(&mut self.stream)? {
            Some(Message::Gather { endpoints }) => Ok(endpoints),
            Some(other) => Err(SparrowError::transport(format!(
                "expected Gather, got {other:?}"
            ))),
            None => Err(SparrowError::transport("seed closed during gather")),
        }
    }

    fn barrier(&mut self) -> Result<()> {
        let epoch = self.epoch;
        write_message(&mut self.stream, &Message::Barrier { epoch })?;
        match read_message(&mut self.stream)? {
            Some(Message::BarrierAck { epoch: acked }) if acked == epoch => {
                self.epoch += 1;
                Ok(())
            }
            Some(other) => Err(SparrowError::transport(format!(
                "expected BarrierAck for epoch {epoch}, got {other:?}"
            ))),
            None => Err(SparrowError::transport("seed closed during barrier")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints_for(rank: u32) -> RankEndpoints {
        RankEndpoints {
            rank,
            worker_addr: format!("w{rank}"),
            server_addr: format!("s{rank}"),
        }
    }

    #[test]
    fn test_local_all_gather_sees_every_rank() {
        let group = LocalExchange::group(3);
        let mut handles = Vec::new();
        for (rank, mut exchange) in group.into_iter().enumerate() {
            handles.push(std::thread::spawn(move || {
                exchange.all_gather(endpoints_for(rank as u32)).unwrap()
            }));
        }
        for handle in handles {
            let gathered = handle.join().unwrap();
            assert_eq!(gathered.len(), 3);
            for (rank, ep) in gathered.iter().enumerate() {
                assert_eq!(ep.rank, rank as u32);
            }
        }
    }

    #[test]
    fn test_local_barrier_releases_together() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let group = LocalExchange::group(4);
        let arrived = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for (i, mut exchange) in group.into_iter().enumerate() {
            let arrived = Arc::clone(&arrived);
            handles.push(std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(i as u64 * 10));
                arrived.fetch_add(1, Ordering::SeqCst);
                exchange.barrier().unwrap();
                // Nobody passes until everyone has arrived.
                assert_eq!(arrived.load(Ordering::SeqCst), 4);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_local_barrier_is_reusable() {
        let group = LocalExchange::group(2);
        let mut handles = Vec::new();
        for mut exchange in group {
            handles.push(std::thread::spawn(move || {
                for _ in 0..5 {
                    exchange.barrier().unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_tcp_exchange_gather_and_barrier() {
        let (seed_addr, seed) = BootstrapSeed::spawn("127.0.0.1", 3).unwrap();
        let mut handles = Vec::new();
        for rank in 0..3u32 {
            let seed_addr = seed_addr.clone();
            handles.push(std::thread::spawn(move || {
                let mut exchange = TcpExchange::connect(&seed_addr, rank).unwrap();
                let gathered = exchange.all_gather(endpoints_for(rank)).unwrap();
                assert_eq!(gathered.len(), 3);
                assert!(gathered.windows(2).all(|w| w[0].rank < w[1].rank));
                exchange.barrier().unwrap();
                exchange.barrier().unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        seed.join().unwrap();
    }
}

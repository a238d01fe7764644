use std::{
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread::{self, ScopedJoinHandle},
    time::Duration,
};

use log::{error, info, warn};

use crate::{
    config::{Config, ServerMode},
    corpus::WordCorpus,
    error::Result,
    transport::{Connection, PeerHandle, RequesterId},
};

/// Packetization of the answers
pub mod chunking;
pub mod connection;
/// Decoding of the requester lines
pub mod requests_handling;
pub mod resource_lock;
pub mod scheduling;

#[cfg(test)]
pub(crate) mod test_utils;

use chunking::ChunkServer;
use connection::{handle_contention, handle_scheduled, ConnectionStats};
use requests_handling::RequestChannel;
use resource_lock::{ResourceLock, ResourceSnapshot};
use scheduling::{run_dispatcher, FairScheduler, SchedulingPolicy};

/// How the single serving path is shared.
#[derive(Debug)]
pub enum ServingPath {
    /// requesters race for the lock
    Contention(ResourceLock),
    /// requests go through the queue and one dispatcher
    Scheduled(FairScheduler),
}

/// Totals of one server run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerReport {
    /// connections handled
    pub connections: usize,
    /// handlers that ended with an error
    pub failed_connections: usize,
    /// sum of the per connection counters
    pub totals: ConnectionStats,
    /// requests served by the dispatcher, scheduling mode only
    pub dispatched: u64,
}

impl ServerReport {
    fn record(&mut self, stats: Option<ConnectionStats>) {
        self.connections += 1;
        let Some(stats) = stats else {
            self.failed_connections += 1;
            return;
        };
        self.totals.requests += stats.requests;
        self.totals.served += stats.served;
        self.totals.collisions += stats.collisions;
        self.totals.probes += stats.probes;
    }
}

/// The word server: one handler thread per connection over a shared
/// [`ChunkServer`] and [`ServingPath`].
#[derive(Debug)]
pub struct WordServer {
    chunks: ChunkServer,
    path: ServingPath,
    num_clients: usize,
    config: Config,
}

impl WordServer {
    /// builds a server for `corpus` in the mode of `config`
    #[must_use]
    pub fn new(corpus: Arc<WordCorpus>, config: &Config) -> Self {
        let path: ServingPath = match config.mode {
            ServerMode::Contention => ServingPath::Contention(ResourceLock::new()),
            ServerMode::Fifo => ServingPath::Scheduled(FairScheduler::new(
                SchedulingPolicy::Fifo,
                config.turn_timeout(),
            )),
            ServerMode::RoundRobin => ServingPath::Scheduled(FairScheduler::new(
                SchedulingPolicy::RoundRobin,
                config.turn_timeout(),
            )),
        };
        Self {
            chunks: ChunkServer::new(corpus, config.words_per_request, config.words_per_packet),
            path,
            num_clients: config.num_clients,
            config: config.clone(),
        }
    }

    /// loads the corpus named by `config`
    ///
    /// # Errors
    /// fails if the corpus cannot be read
    pub fn from_config(config: &Config) -> Result<Self> {
        let corpus: WordCorpus = WordCorpus::load(&config.input_file)?;
        info!(
            "Loaded {} words from {}",
            corpus.content_len(),
            config.input_file
        );
        Ok(Self::new(Arc::new(corpus), config))
    }

    /// the packetizer
    #[inline]
    #[must_use]
    pub fn chunks(&self) -> &ChunkServer {
        &self.chunks
    }

    /// the shared serving path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &ServingPath {
        &self.path
    }

    /// lock state, contention mode only
    #[must_use]
    pub fn lock_snapshot(&self) -> Option<ResourceSnapshot> {
        match &self.path {
            ServingPath::Contention(lock) => Some(lock.snapshot()),
            ServingPath::Scheduled(_) => None,
        }
    }

    /// binds the configured address
    ///
    /// # Errors
    /// fails if the address is invalid or taken
    pub fn bind(&self) -> Result<TcpListener> {
        let listener: TcpListener = TcpListener::bind(self.config.socket_addr()?)?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accepts exactly `num_clients` connections on `listener` and serves
    /// them, see [`WordServer::serve_connections`].
    pub fn serve(&self, listener: &TcpListener) -> ServerReport {
        let read_timeout: Duration = self.config.read_timeout();
        let accepted = listener
            .incoming()
            .take(self.num_clients)
            .filter_map(move |stream: std::io::Result<TcpStream>| {
                let stream: TcpStream = stream
                    .map_err(|e| error!("Accept failed: {e}"))
                    .ok()?;
                if let Ok(addr) = stream.peer_addr() {
                    info!("Accepted connection from {addr}");
                }
                Connection::tcp(stream, read_timeout)
                    .map_err(|e| error!("Cannot set up connection: {e}"))
                    .ok()
            });
        self.serve_connections(accepted)
    }

    /// Serves every connection yielded by `connections` on its own thread,
    /// requester ids are assigned from 1 in arrival order. Returns once every
    /// handler ended and, in scheduling mode, the dispatcher drained the
    /// queue.
    pub fn serve_connections<I>(&self, connections: I) -> ServerReport
    where
        I: IntoIterator<Item = Connection>,
    {
        let mut report: ServerReport = ServerReport::default();
        thread::scope(|s| {
            let dispatcher: Option<ScopedJoinHandle<'_, u64>> = match &self.path {
                ServingPath::Scheduled(scheduler) => {
                    Some(s.spawn(move || run_dispatcher(scheduler, &self.chunks)))
                }
                ServingPath::Contention(_) => None,
            };

            let handlers: Vec<ScopedJoinHandle<'_, Option<ConnectionStats>>> = (1..)
                .zip(connections)
                .map(|(id, conn): (RequesterId, Connection)| {
                    s.spawn(move || self.handle_connection(id, conn))
                })
                .collect();
            for handler in handlers {
                let stats: Option<ConnectionStats> = handler.join().unwrap_or_else(|_| {
                    error!("A connection handler panicked");
                    None
                });
                report.record(stats);
            }

            if let ServingPath::Scheduled(scheduler) = &self.path {
                info!("Every connection ended, draining {} queued requests", scheduler.pending());
                scheduler.shutdown();
            }
            if let Some(dispatcher) = dispatcher {
                report.dispatched = dispatcher.join().unwrap_or_else(|_| {
                    error!("The dispatcher panicked");
                    0
                });
            }
        });
        info!("Server finished: {report:?}");
        report
    }

    fn handle_connection(&self, id: RequesterId, conn: Connection) -> Option<ConnectionStats> {
        let target_topic: String = format!("conn[{id}]");
        info!(target: &target_topic, "Handling new requester");
        let (source, sink) = conn.into_parts();
        let channel: RequestChannel = RequestChannel::new(id, source);
        let peer: PeerHandle = PeerHandle::new(id, sink);
        let handled: Result<ConnectionStats> = match &self.path {
            ServingPath::Contention(lock) => handle_contention(channel, &peer, lock, &self.chunks),
            ServingPath::Scheduled(scheduler) => handle_scheduled(channel, &peer, scheduler),
        };
        handled
            .map_err(|e| warn!(target: &target_topic, "Connection failed: {e}"))
            .ok()
    }
}

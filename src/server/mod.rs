//! Listeners, connection lifecycle, and shutdown
//!
//! The server owns every other component: it binds the two listeners,
//! dispatches accepted sockets by role, enforces the producer capacity
//! policy, keeps exact active-connection counters, and drives the
//! graceful shutdown sequence.

mod ingest;
mod query;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastHub;
use crate::config::ServerConfig;
use crate::error::StartupError;
use crate::persist::PersistenceWriter;
use crate::store::LogStore;

use ingest::IngestContext;
use query::QueryContext;

/// Greeting written to every producer connection before input is read.
pub const INGEST_BANNER: &str = "loghub log service: send newline-terminated log lines\n";

/// Greeting written to every query connection; advertises the commands.
pub const QUERY_BANNER: &str = "loghub query service\n\
Commands: HELP, COUNT, STATS, QUERY keyword=<text> keywords=a,b operator=AND|OR \
regex=<pattern> time_from=<unix> time_to=<unix>\n";

/// Line written to producers refused under the capacity policy.
pub const CAPACITY_REJECTION: &str = "ERROR: server at capacity, try again later\n";

/// How long shutdown waits for in-flight connections before forcing
/// them closed.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Role assigned to a connection by the listener that accepted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Sends log lines; fire-and-forget.
    Producer,
    /// Issues HELP/COUNT/STATS/QUERY commands.
    QueryClient,
}

/// Exact counts of live connections per role.
///
/// Incremented on accept, decremented by the RAII guard on every
/// teardown path, so they reconcile to zero with no outstanding
/// connections.
#[derive(Debug)]
pub struct ConnectionCounters {
    producers: AtomicUsize,
    query_clients: AtomicUsize,
}

impl ConnectionCounters {
    pub(crate) fn new() -> Self {
        Self {
            producers: AtomicUsize::new(0),
            query_clients: AtomicUsize::new(0),
        }
    }

    /// Live producer connections.
    pub fn active_producers(&self) -> usize {
        self.producers.load(Ordering::Acquire)
    }

    /// Live query connections.
    pub fn active_query_clients(&self) -> usize {
        self.query_clients.load(Ordering::Acquire)
    }

    fn slot(&self, kind: ConnectionKind) -> &AtomicUsize {
        match kind {
            ConnectionKind::Producer => &self.producers,
            ConnectionKind::QueryClient => &self.query_clients,
        }
    }

    /// Claim a producer slot unless the cap is already reached. The
    /// check-and-increment is atomic, so the cap is exact even under
    /// racing accepts.
    fn try_acquire_producer(
        self: &Arc<Self>,
        max_clients: usize,
    ) -> Option<ConnectionGuard> {
        let claimed = self
            .producers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < max_clients {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .is_ok();
        claimed.then(|| ConnectionGuard {
            counters: Arc::clone(self),
            kind: ConnectionKind::Producer,
        })
    }

    fn acquire(self: &Arc<Self>, kind: ConnectionKind) -> ConnectionGuard {
        self.slot(kind).fetch_add(1, Ordering::AcqRel);
        ConnectionGuard {
            counters: Arc::clone(self),
            kind,
        }
    }
}

/// Holds one slot in [`ConnectionCounters`] for the life of a
/// connection handler; releasing is tied to drop so abrupt closes and
/// panics still reconcile.
struct ConnectionGuard {
    counters: Arc<ConnectionCounters>,
    kind: ConnectionKind,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counters.slot(self.kind).fetch_sub(1, Ordering::AcqRel);
    }
}

/// The assembled engine: store, hub, optional persistence, listeners.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    store: Arc<LogStore>,
    hub: Arc<BroadcastHub>,
    counters: Arc<ConnectionCounters>,
    writer: Option<PersistenceWriter>,
    ingest_listener: TcpListener,
    query_listener: TcpListener,
    ingest_addr: SocketAddr,
    query_addr: SocketAddr,
}

impl Server {
    /// Validate the configuration, bind both listeners, and assemble the
    /// engine. When persistence is enabled this also prepares the
    /// directory and replays existing files into the store.
    ///
    /// Any failure here is a [`StartupError`]; nothing has been served
    /// yet and the process should exit non-zero.
    pub async fn bind(config: ServerConfig) -> Result<Self, StartupError> {
        config.validate()?;

        let ingest_listener =
            TcpListener::bind(config.ingest_addr)
                .await
                .map_err(|source| StartupError::Bind {
                    role: "ingestion",
                    addr: config.ingest_addr,
                    source,
                })?;
        let query_listener =
            TcpListener::bind(config.query_addr)
                .await
                .map_err(|source| StartupError::Bind {
                    role: "query",
                    addr: config.query_addr,
                    source,
                })?;

        // With port 0 the OS picks the port; report what was bound.
        let ingest_addr = ingest_listener.local_addr().map_err(|source| StartupError::Bind {
            role: "ingestion",
            addr: config.ingest_addr,
            source,
        })?;
        let query_addr = query_listener.local_addr().map_err(|source| StartupError::Bind {
            role: "query",
            addr: config.query_addr,
            source,
        })?;

        let store = Arc::new(LogStore::new(config.capacity, config.max_line_bytes));
        let hub = Arc::new(BroadcastHub::with_default_channels());

        let writer = match &config.persistence {
            Some(persist_config) => {
                if persist_config.replay_on_startup {
                    match PersistenceWriter::replay_into(persist_config, &store) {
                        Ok(_) => {}
                        Err(err) => {
                            warn!(error = %err, "failed to replay persisted entries");
                        }
                    }
                }
                Some(PersistenceWriter::start(persist_config)?)
            }
            None => None,
        };

        info!(
            ingest = %ingest_addr,
            query = %query_addr,
            capacity = config.capacity,
            persistence = config.persistence.is_some(),
            "loghub server initialized"
        );

        Ok(Self {
            config,
            store,
            hub,
            counters: Arc::new(ConnectionCounters::new()),
            writer,
            ingest_listener,
            query_listener,
            ingest_addr,
            query_addr,
        })
    }

    /// Address the ingestion listener is bound to.
    pub fn ingest_addr(&self) -> SocketAddr {
        self.ingest_addr
    }

    /// Address the query listener is bound to.
    pub fn query_addr(&self) -> SocketAddr {
        self.query_addr
    }

    /// Shared store, for embedders that append or query in-process.
    pub fn store(&self) -> Arc<LogStore> {
        Arc::clone(&self.store)
    }

    /// Shared hub, for wiring up broadcast bridges.
    pub fn hub(&self) -> Arc<BroadcastHub> {
        Arc::clone(&self.hub)
    }

    /// Live connection counters.
    pub fn counters(&self) -> Arc<ConnectionCounters> {
        Arc::clone(&self.counters)
    }

    /// Serve until the shutdown signal flips to `true` (or its sender is
    /// dropped), then drain: stop accepting, let in-flight handlers
    /// finish within a bounded interval, flush and close persistence,
    /// and log the completion marker.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.ingest_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.dispatch(ConnectionKind::Producer, stream, peer, &shutdown, &mut tasks);
                    }
                    Err(err) => warn!(error = %err, "failed to accept ingestion connection"),
                },
                accepted = self.query_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.dispatch(ConnectionKind::QueryClient, stream, peer, &shutdown, &mut tasks);
                    }
                    Err(err) => warn!(error = %err, "failed to accept query connection"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        drop(self.ingest_listener);
        drop(self.query_listener);
        info!("stop requested, no longer accepting connections");

        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("drain deadline passed, forcing remaining connections closed");
            tasks.shutdown().await;
        }

        if let Some(writer) = self.writer {
            writer.shutdown().await;
        }

        info!("shutdown complete");
    }

    /// Hand an accepted socket to the handler for its role.
    fn dispatch(
        &self,
        kind: ConnectionKind,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: &watch::Receiver<bool>,
        tasks: &mut JoinSet<()>,
    ) {
        debug!(%peer, ?kind, "accepted connection");
        match kind {
            ConnectionKind::Producer => {
                let Some(guard) = self.counters.try_acquire_producer(self.config.max_clients)
                else {
                    info!(%peer, "rejecting producer over capacity");
                    tasks.spawn(reject_over_capacity(stream));
                    return;
                };
                let context = IngestContext {
                    store: Arc::clone(&self.store),
                    hub: Arc::clone(&self.hub),
                    persist: self.writer.as_ref().map(|w| w.handle()),
                    idle_timeout: self.config.idle_timeout,
                };
                let shutdown = shutdown.clone();
                tasks.spawn(async move {
                    let _guard = guard;
                    ingest::handle_producer(stream, peer, context, shutdown).await;
                });
            }
            ConnectionKind::QueryClient => {
                let guard = self.counters.acquire(ConnectionKind::QueryClient);
                let context = QueryContext {
                    store: Arc::clone(&self.store),
                    counters: Arc::clone(&self.counters),
                    persist: self.writer.as_ref().map(|w| w.handle()),
                    idle_timeout: self.config.idle_timeout,
                };
                let shutdown = shutdown.clone();
                tasks.spawn(async move {
                    let _guard = guard;
                    query::handle_query_client(stream, peer, context, shutdown).await;
                });
            }
        }
    }
}

/// Inform an over-capacity producer and close without counting it.
async fn reject_over_capacity(mut stream: TcpStream) {
    let _ = stream.write_all(CAPACITY_REJECTION.as_bytes()).await;
    let _ = stream.shutdown().await;
}

//! Server and persistence configuration
//!
//! Configuration is plain data with coded defaults; the binary fills it
//! from environment variables and the library validates it before any
//! socket is bound. There is no CLI framework here — embedders construct
//! the structs directly.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::StartupError;

/// Default ingestion listener address.
pub const DEFAULT_INGEST_ADDR: &str = "0.0.0.0:9999";

/// Default query listener address.
pub const DEFAULT_QUERY_ADDR: &str = "0.0.0.0:9998";

/// Default bounded-history capacity (entries).
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default maximum accepted line length in bytes; longer lines are
/// truncated with a marker.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024;

/// Default cap on concurrent producer connections.
pub const DEFAULT_MAX_CLIENTS: usize = 64;

/// Default per-connection idle deadline.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for the optional persistence writer.
#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Directory holding the active and sealed log files. Created on
    /// startup when persistence is enabled; never touched otherwise.
    pub directory: PathBuf,
    /// Rotation threshold: once the active file exceeds this many bytes
    /// it is sealed and a fresh file is opened.
    pub max_file_bytes: u64,
    /// Number of sealed files retained; older ones are pruned. Zero
    /// disables pruning.
    pub max_files: usize,
    /// Replay persisted entries into the store on startup.
    pub replay_on_startup: bool,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            max_file_bytes: 10 * 1024 * 1024,
            max_files: 10,
            replay_on_startup: true,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address of the fire-and-forget ingestion listener.
    pub ingest_addr: SocketAddr,
    /// Address of the query listener. Must differ from `ingest_addr`.
    pub query_addr: SocketAddr,
    /// Bounded-history capacity in entries.
    pub capacity: usize,
    /// Maximum accepted line length in bytes before truncation.
    pub max_line_bytes: usize,
    /// Maximum concurrent producer connections. Query clients are not
    /// capped.
    pub max_clients: usize,
    /// Idle deadline for both producer and query connections.
    pub idle_timeout: Duration,
    /// Persistence settings; `None` means nothing is ever written to disk.
    pub persistence: Option<PersistConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ingest_addr: DEFAULT_INGEST_ADDR.parse().unwrap_or_else(|_| {
                SocketAddr::from(([0, 0, 0, 0], 9999))
            }),
            query_addr: DEFAULT_QUERY_ADDR.parse().unwrap_or_else(|_| {
                SocketAddr::from(([0, 0, 0, 0], 9998))
            }),
            capacity: DEFAULT_CAPACITY,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            max_clients: DEFAULT_MAX_CLIENTS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            persistence: None,
        }
    }
}

impl ServerConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// Recognized variables:
    ///
    /// - `LOGHUB_INGEST_ADDR` / `LOGHUB_QUERY_ADDR` — listener addresses
    /// - `LOGHUB_CAPACITY` — history capacity in entries
    /// - `LOGHUB_MAX_LINE_BYTES` — truncation threshold
    /// - `LOGHUB_MAX_CLIENTS` — producer connection cap
    /// - `LOGHUB_IDLE_TIMEOUT_SECS` — idle deadline
    /// - `LOGHUB_PERSIST_DIR` — enables persistence into this directory
    /// - `LOGHUB_PERSIST_MAX_FILE_MB` — rotation threshold in MiB
    /// - `LOGHUB_PERSIST_MAX_FILES` — sealed files retained
    pub fn from_env() -> Result<Self, StartupError> {
        let mut config = Self::default();

        if let Some(addr) = env_parsed::<SocketAddr>("LOGHUB_INGEST_ADDR")? {
            config.ingest_addr = addr;
        }
        if let Some(addr) = env_parsed::<SocketAddr>("LOGHUB_QUERY_ADDR")? {
            config.query_addr = addr;
        }
        if let Some(capacity) = env_parsed::<usize>("LOGHUB_CAPACITY")? {
            config.capacity = capacity;
        }
        if let Some(bytes) = env_parsed::<usize>("LOGHUB_MAX_LINE_BYTES")? {
            config.max_line_bytes = bytes;
        }
        if let Some(clients) = env_parsed::<usize>("LOGHUB_MAX_CLIENTS")? {
            config.max_clients = clients;
        }
        if let Some(secs) = env_parsed::<u64>("LOGHUB_IDLE_TIMEOUT_SECS")? {
            config.idle_timeout = Duration::from_secs(secs);
        }

        if let Ok(dir) = env::var("LOGHUB_PERSIST_DIR") {
            let mut persist = PersistConfig {
                directory: PathBuf::from(dir),
                ..Default::default()
            };
            if let Some(mb) = env_parsed::<u64>("LOGHUB_PERSIST_MAX_FILE_MB")? {
                persist.max_file_bytes = mb * 1024 * 1024;
            }
            if let Some(files) = env_parsed::<usize>("LOGHUB_PERSIST_MAX_FILES")? {
                persist.max_files = files;
            }
            config.persistence = Some(persist);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that must hold before any socket is bound.
    pub fn validate(&self) -> Result<(), StartupError> {
        // Port 0 asks the OS for any free port, so two port-0 addresses
        // end up distinct once bound.
        if self.ingest_addr == self.query_addr && self.ingest_addr.port() != 0 {
            return Err(StartupError::IdenticalAddresses(self.ingest_addr));
        }
        if self.capacity == 0 {
            return Err(StartupError::InvalidConfig(
                "capacity must be at least 1".to_string(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(StartupError::InvalidConfig(
                "max_line_bytes must be at least 1".to_string(),
            ));
        }
        if self.max_clients == 0 {
            return Err(StartupError::InvalidConfig(
                "max_clients must be at least 1".to_string(),
            ));
        }
        if let Some(persist) = &self.persistence {
            if persist.max_file_bytes == 0 {
                return Err(StartupError::InvalidConfig(
                    "persistence max_file_bytes must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Read and parse an env var; unset means `None`, unparsable is an error.
fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>, StartupError> {
    match env::var(name) {
        Ok(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            StartupError::InvalidConfig(format!("{} has invalid value {:?}", name, raw))
        }),
        Err(_) => Ok(None),
    }
}

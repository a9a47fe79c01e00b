//! LogHub — embeddable log collection and query engine
//!
//! A small TCP log server in pure Rust: many producers stream
//! newline-terminated log lines into a bounded in-memory store, query
//! clients filter the retained history with a keyword/regex/time grammar,
//! and every accepted line can be persisted to rotating files and fanned
//! out to broadcast subscribers.
//!
//! # Features
//!
//! - **Two listeners**: fire-and-forget ingestion and a line-oriented
//!   query protocol (HELP, COUNT, STATS, QUERY)
//! - **Bounded history**: fixed-capacity store with FIFO eviction and
//!   running counters
//! - **Composable filters**: keywords with AND/OR, regex search, and
//!   inclusive time bounds
//! - **Rotating persistence**: optional background writer with size-based
//!   rotation, pruning, and startup replay
//! - **Broadcast fan-out**: named channels with membership predicates;
//!   slow subscribers miss entries instead of stalling producers
//!
//! # Modules
//!
//! - `config`: server and persistence configuration
//! - `store`: the bounded, thread-safe log store
//! - `query`: command grammar, filter construction, and evaluation
//! - `persist`: rotating-file persistence writer
//! - `broadcast`: channel-based publish/subscribe hub
//! - `server`: listeners, connection lifecycle, and shutdown
//!
//! # Example
//!
//! ```no_run
//! use loghub::config::ServerConfig;
//! use loghub::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let server = Server::bind(config).await?;
//!     let (_stop, stop_rx) = tokio::sync::watch::channel(false);
//!     server.run(stop_rx).await;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod error;
pub mod persist;
pub mod query;
pub mod server;
pub mod store;

// Re-export commonly used items at crate root
pub use broadcast::{BroadcastHub, ChannelPredicate, Subscription};
pub use config::{PersistConfig, ServerConfig};
pub use error::StartupError;
pub use query::{Command, Query};
pub use server::Server;
pub use store::{LogEntry, LogStore, StoreStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

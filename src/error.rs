//! Startup error taxonomy
//!
//! Fatal errors that prevent the server from ever serving. Everything
//! that can go wrong after startup is scoped to a single connection or
//! logged and dropped; those paths carry their own error types
//! (`query::QueryParseError`, `persist::PersistError`).

use std::net::SocketAddr;

use thiserror::Error;

/// Errors that abort startup before any connection is served.
///
/// The binary maps every variant to a non-zero exit code.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The ingestion and query listeners were given the same address.
    #[error("ingestion and query listeners must use different addresses (both {0})")]
    IdenticalAddresses(SocketAddr),

    /// A listener address could not be bound.
    #[error("failed to bind {role} listener on {addr}: {source}")]
    Bind {
        /// Which listener failed ("ingestion" or "query").
        role: &'static str,
        /// The address that could not be bound.
        addr: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The persistence directory could not be created or opened.
    #[error("failed to prepare persistence directory {path}: {source}")]
    Persistence {
        /// Directory the writer was configured with.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

//! Rotating-file persistence
//!
//! An optional background writer appends every accepted entry to an
//! active file and seals it into a numbered file once it grows past the
//! configured threshold. Persistence is strictly off the ingestion hot
//! path: entries are queued to a writer task, and a failed write is
//! logged and dropped rather than surfaced to any producer.
//!
//! When persistence is disabled no directory or file is ever created —
//! the writer simply does not exist.

mod writer;

pub use writer::{PersistError, PersistHandle, PersistStats, PersistenceWriter, ACTIVE_FILE_NAME};

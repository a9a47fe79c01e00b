//! Background writer task, rotation, pruning, and replay

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PersistConfig;
use crate::error::StartupError;
use crate::store::{LogEntry, LogStore};

/// Name of the file currently being appended to.
pub const ACTIVE_FILE_NAME: &str = "current.log";

/// Prefix of sealed, rotated files (`logs_000001.log`, ...).
const SEALED_PREFIX: &str = "logs_";

/// Timestamp layout used in persisted records.
const RECORD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors inside the persistence path. Never fatal to the server; they
/// are logged and the affected record is dropped.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Underlying file or directory operation failed.
    #[error("persistence I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifetime counters for the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistStats {
    /// Records written to disk.
    pub persisted: u64,
    /// Records dropped because a write or rotation failed.
    pub failed: u64,
}

#[derive(Default, Debug)]
struct SharedCounters {
    persisted: AtomicU64,
    failed: AtomicU64,
}

/// Handle to the background persistence writer.
///
/// Entries flow through an unbounded queue into a dedicated task;
/// [`PersistenceWriter::shutdown`] drains the queue, flushes, and closes
/// the active file.
#[derive(Debug)]
pub struct PersistenceWriter {
    sender: mpsc::UnboundedSender<LogEntry>,
    counters: Arc<SharedCounters>,
    join: JoinHandle<()>,
}

/// Cheap, cloneable handle that connection handlers use to queue entries
/// and read counters without owning the writer.
#[derive(Clone)]
pub struct PersistHandle {
    sender: mpsc::UnboundedSender<LogEntry>,
    counters: Arc<SharedCounters>,
}

impl PersistHandle {
    /// Queue one entry for persistence. Non-blocking; a no-op once
    /// shutdown has begun.
    pub fn enqueue(&self, entry: &LogEntry) {
        let _ = self.sender.send(entry.clone());
    }

    /// Current lifetime counters.
    pub fn stats(&self) -> PersistStats {
        PersistStats {
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl PersistenceWriter {
    /// Create the directory, open the active file, and spawn the writer
    /// task. Fails fast when the directory cannot be prepared.
    pub fn start(config: &PersistConfig) -> Result<Self, StartupError> {
        let active = ActiveFile::open(config).map_err(|source| StartupError::Persistence {
            path: config.directory.display().to_string(),
            source,
        })?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(SharedCounters::default());
        let join = tokio::spawn(writer_loop(active, receiver, Arc::clone(&counters)));

        info!(directory = %config.directory.display(), "persistence enabled");
        Ok(Self {
            sender,
            counters,
            join,
        })
    }

    /// Queue one entry for persistence. Non-blocking; silently a no-op
    /// once shutdown has begun.
    pub fn enqueue(&self, entry: &LogEntry) {
        let _ = self.sender.send(entry.clone());
    }

    /// A cloneable enqueue/stats handle for connection handlers.
    pub fn handle(&self) -> PersistHandle {
        PersistHandle {
            sender: self.sender.clone(),
            counters: Arc::clone(&self.counters),
        }
    }

    /// Current lifetime counters.
    pub fn stats(&self) -> PersistStats {
        PersistStats {
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Drain the queue, flush, and close the active file.
    pub async fn shutdown(self) {
        drop(self.sender);
        if self.join.await.is_err() {
            warn!("persistence writer task ended abnormally");
        }
    }

    /// Feed previously persisted records back into the store, oldest
    /// file first. Does nothing (and touches nothing) when the directory
    /// does not exist. Returns the number of replayed records.
    pub fn replay_into(config: &PersistConfig, store: &LogStore) -> Result<usize, PersistError> {
        if !config.directory.exists() {
            return Ok(0);
        }

        let mut files = sealed_files(&config.directory)?;
        let active = config.directory.join(ACTIVE_FILE_NAME);
        if active.exists() {
            files.push(active);
        }

        let mut replayed = 0;
        for path in files {
            let file = File::open(&path)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                let (timestamp, text) = parse_record(&line);
                store.append_at(text, timestamp);
                replayed += 1;
            }
        }

        if replayed > 0 {
            info!(replayed, "replayed persisted entries into the store");
        }
        Ok(replayed)
    }
}

async fn writer_loop(
    mut active: ActiveFile,
    mut receiver: mpsc::UnboundedReceiver<LogEntry>,
    counters: Arc<SharedCounters>,
) {
    while let Some(entry) = receiver.recv().await {
        match active.write_record(&entry) {
            Ok(()) => {
                counters.persisted.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "dropping entry from persistence");
            }
        }
    }

    if let Err(err) = active.flush() {
        warn!(error = %err, "failed to flush persistence file on shutdown");
    }
    debug!("persistence writer drained and closed");
}

/// The active file plus the rotation state that goes with it.
struct ActiveFile {
    directory: PathBuf,
    path: PathBuf,
    file: File,
    bytes: u64,
    next_seal: u64,
    max_file_bytes: u64,
    max_files: usize,
}

impl ActiveFile {
    fn open(config: &PersistConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&config.directory)?;
        let path = config.directory.join(ACTIVE_FILE_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let bytes = file.metadata()?.len();
        let next_seal = next_seal_number(&config.directory)?;

        Ok(Self {
            directory: config.directory.clone(),
            path,
            file,
            bytes,
            next_seal,
            max_file_bytes: config.max_file_bytes,
            max_files: config.max_files,
        })
    }

    /// Append one `[timestamp] text` record, rotating afterwards if the
    /// file has grown past the threshold.
    fn write_record(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let record = format_record(entry);
        self.file.write_all(record.as_bytes())?;
        self.file.flush()?;
        self.bytes += record.len() as u64;

        if self.bytes > self.max_file_bytes {
            self.rotate()?;
        }
        Ok(())
    }

    /// Seal the active file under the next sequence number and open a
    /// fresh one.
    fn rotate(&mut self) -> std::io::Result<()> {
        self.file.flush()?;

        let sealed = self
            .directory
            .join(format!("{}{:06}.log", SEALED_PREFIX, self.next_seal));
        fs::rename(&self.path, &sealed)?;
        info!(sealed = %sealed.display(), "rotated persistence file");

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.bytes = 0;
        self.next_seal += 1;

        if let Err(err) = self.prune() {
            // Pruning failure leaves extra files behind but must not
            // stop the writer.
            warn!(error = %err, "failed to prune old persistence files");
        }
        Ok(())
    }

    /// Delete the oldest sealed files beyond the retention count.
    fn prune(&self) -> std::io::Result<usize> {
        if self.max_files == 0 {
            return Ok(0);
        }

        let files = sealed_files(&self.directory)?;
        if files.len() <= self.max_files {
            return Ok(0);
        }

        let excess = files.len() - self.max_files;
        for path in &files[..excess] {
            fs::remove_file(path)?;
        }
        Ok(excess)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }
}

/// Sealed files in the directory, sorted oldest first.
fn sealed_files(directory: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(SEALED_PREFIX) && name.ends_with(".log") {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Next sequence number to seal under, one past the highest on disk.
fn next_seal_number(directory: &Path) -> std::io::Result<u64> {
    let mut highest = 0;
    for path in sealed_files(directory)? {
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if let Ok(number) = stem.trim_start_matches(SEALED_PREFIX).parse::<u64>() {
                highest = highest.max(number);
            }
        }
    }
    Ok(highest + 1)
}

fn format_record(entry: &LogEntry) -> String {
    let when = DateTime::<Utc>::from_timestamp(entry.timestamp, 0)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_default());
    format!("[{}] {}\n", when.format(RECORD_TIME_FORMAT), entry.text)
}

/// Split a persisted record into timestamp and text. A record whose
/// prefix does not parse is replayed whole with the current time.
fn parse_record(line: &str) -> (i64, &str) {
    if let Some(rest) = line.strip_prefix('[') {
        if let Some((stamp, text)) = rest.split_once("] ") {
            if let Ok(naive) = NaiveDateTime::parse_from_str(stamp, RECORD_TIME_FORMAT) {
                return (naive.and_utc().timestamp(), text);
            }
        }
    }
    (Utc::now().timestamp(), line)
}

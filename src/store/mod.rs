//! Bounded, thread-safe log store
//!
//! The store owns the retained history: an ordered ring of entries with
//! fixed capacity, FIFO eviction, and running counters. All mutation goes
//! through [`LogStore::append`], all reads through [`LogStore::snapshot`];
//! the interior lock is held only for the append or the copy step, never
//! while callers evaluate filters or perform I/O.

use std::collections::VecDeque;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

/// Marker appended to lines that were cut at the length limit.
pub const TRUNCATION_MARKER: &str = "...";

/// One stored unit of ingested text.
///
/// Immutable once created: the sequence number is unique and assigned at
/// append time, the timestamp is ingestion wall-clock time at seconds
/// resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Monotonically increasing, unique per store.
    pub sequence: u64,
    /// Unix timestamp (seconds) at ingestion.
    pub timestamp: i64,
    /// Line text, truncated to the configured limit with a marker if the
    /// inbound line was longer.
    pub text: String,
    /// Whether the text was cut at the length limit.
    pub truncated: bool,
}

/// Counters reported by [`LogStore::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Lines accepted over the store's lifetime.
    pub total_received: u64,
    /// Entries evicted to stay within capacity.
    pub total_evicted: u64,
    /// Entries currently retained.
    pub current_size: usize,
}

/// Interior state guarded by one short-critical-section lock.
#[derive(Debug)]
struct StoreInner {
    entries: VecDeque<LogEntry>,
    next_sequence: u64,
    total_received: u64,
    total_evicted: u64,
}

/// Bounded in-memory history with FIFO eviction.
///
/// Thread-safe against arbitrarily many concurrent appends and snapshots.
#[derive(Debug)]
pub struct LogStore {
    capacity: usize,
    max_line_bytes: usize,
    inner: RwLock<StoreInner>,
}

impl LogStore {
    /// Create a store retaining at most `capacity` entries, truncating
    /// each line to `max_line_bytes`.
    pub fn new(capacity: usize, max_line_bytes: usize) -> Self {
        Self {
            capacity,
            max_line_bytes,
            inner: RwLock::new(StoreInner {
                entries: VecDeque::with_capacity(capacity.min(4096)),
                next_sequence: 1,
                total_received: 0,
                total_evicted: 0,
            }),
        }
    }

    /// Append a line at the current wall-clock time.
    pub fn append(&self, text: &str) -> LogEntry {
        self.append_at(text, Utc::now().timestamp())
    }

    /// Append a line with an explicit timestamp (persistence replay).
    ///
    /// Assigns the next sequence number, truncates oversized text, evicts
    /// the oldest entry at capacity, and updates counters. Never blocks
    /// on I/O.
    pub fn append_at(&self, text: &str, timestamp: i64) -> LogEntry {
        let (text, truncated) = truncate_line(text, self.max_line_bytes);

        let mut inner = self.inner.write();
        let entry = LogEntry {
            sequence: inner.next_sequence,
            timestamp,
            text,
            truncated,
        };
        inner.next_sequence += 1;
        inner.total_received += 1;

        while inner.entries.len() >= self.capacity {
            inner.entries.pop_front();
            inner.total_evicted += 1;
        }
        inner.entries.push_back(entry.clone());

        entry
    }

    /// Point-in-time ordered copy of the retained entries.
    ///
    /// The lock is released before the caller sees the copy, so filter
    /// evaluation never holds up ingestion.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        let inner = self.inner.read();
        inner.entries.iter().cloned().collect()
    }

    /// Current counters.
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.read();
        StoreStats {
            total_received: inner.total_received,
            total_evicted: inner.total_evicted,
            current_size: inner.entries.len(),
        }
    }

    /// Entries currently retained.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured truncation threshold in bytes.
    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }
}

/// Cut `text` down to at most `max_bytes`, appending the truncation
/// marker when anything was removed. The cut lands on a char boundary so
/// the result stays valid UTF-8.
fn truncate_line(text: &str, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text.to_string(), false);
    }

    if max_bytes <= TRUNCATION_MARKER.len() {
        let mut cut = max_bytes;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        return (text[..cut].to_string(), true);
    }

    let mut cut = max_bytes - TRUNCATION_MARKER.len();
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut result = String::with_capacity(cut + TRUNCATION_MARKER.len());
    result.push_str(&text[..cut]);
    result.push_str(TRUNCATION_MARKER);
    (result, true)
}

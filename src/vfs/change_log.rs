//! Change Log
//!
//! Holds the latest change record per object name and answers
//! "what changed since t" queries against a monotonic clock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use super::identity::ObjectIdentity;

/// What happened to an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    #[serde(rename = "change")]
    Changed,
    #[serde(rename = "delete")]
    Deleted,
}

/// Timestamped note that an object changed or was deleted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Seconds on the log's monotonic clock
    pub timestamp: f64,
    pub object: ObjectIdentity,
}

/// Monotonic clock in fractional seconds since its creation
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct Entries {
    by_name: HashMap<String, (u64, ChangeRecord)>,
    next_seq: u64,
}

impl Entries {
    fn insert(&mut self, record: ChangeRecord) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_name.insert(record.object.name.clone(), (seq, record));
    }
}

/// Latest change record per object name
///
/// Writes replace any existing entry for the same name, so the most recently
/// recorded event wins regardless of its timestamp.
#[derive(Debug, Default)]
pub struct ChangeLog {
    clock: Clock,
    entries: RwLock<Entries>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current reading of the clock used to stamp records
    pub fn clock(&self) -> f64 {
        self.clock.now()
    }

    /// Insert or replace the entry for `record.object.name`
    pub fn record(&self, record: ChangeRecord) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(record);
    }

    /// Stamp `object` with the current clock and record it
    pub fn record_now(&self, kind: ChangeKind, object: ObjectIdentity) -> ChangeRecord {
        // Stamp under the write lock so timestamps follow recording order
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let record = ChangeRecord {
            kind,
            timestamp: self.clock.now(),
            object,
        };
        entries.insert(record.clone());
        record
    }

    /// All records with `timestamp >= since`, oldest recording first
    pub fn query(&self, since: f64) -> Vec<ChangeRecord> {
        self.snapshot(since).0
    }

    /// Like [`query`](Self::query), paired with a clock reading taken under
    /// the same read lock
    ///
    /// Every record stamped before the returned reading is in the result, and
    /// every record stamped later has a timestamp at or after it, so polling
    /// from the reading never skips a change.
    pub fn snapshot(&self, since: f64) -> (Vec<ChangeRecord>, f64) {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        let mut matched: Vec<(u64, ChangeRecord)> = entries
            .by_name
            .values()
            .filter(|(_, record)| record.timestamp >= since)
            .cloned()
            .collect();
        drop(entries);

        matched.sort_by_key(|(seq, _)| *seq);
        (matched.into_iter().map(|(_, record)| record).collect(), now)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_name
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

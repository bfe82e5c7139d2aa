//! Durable records of selected beacon readings.
//!
//! Saving is always an explicit user action. Each save appends a new
//! [`PersistedBeaconRecord`] to a [`RecordStore`]; whether a beacon that was
//! already saved this session is saved again is decided by [`SavePolicy`].

use crate::observation::BeaconObservation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::OpenOptions;
use std::future::Future;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Snapshot of one observation at the moment it was saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedBeaconRecord {
    pub beacon_name: Option<String>,
    pub mac_address: String,
    pub distance: f64,
    pub proximity_description: String,
    pub rssi: i32,
    pub timestamp: DateTime<Utc>,
}

impl PersistedBeaconRecord {
    pub fn from_observation(observation: &BeaconObservation, timestamp: DateTime<Utc>) -> Self {
        Self {
            beacon_name: observation.display_name.clone(),
            mac_address: observation.identity.clone(),
            distance: observation.distance_meters,
            proximity_description: observation.proximity.description().to_string(),
            rssi: observation.rssi,
            timestamp,
        }
    }
}

/// Per-session sequence number of a record, starting at 1 for each opened store.
///
/// Not an offset into the store: a reopened file numbers from 1 again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors reported by a [`RecordStore`].
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type AppendFuture<'a> =
    Pin<Box<dyn Future<Output = Result<RecordId, PersistError>> + Send + 'a>>;

/// Append-only destination for saved readings.
///
/// Every call creates a new record; stores never upsert by beacon identity.
pub trait RecordStore: Send + Sync {
    fn append<'a>(&'a self, record: &'a PersistedBeaconRecord) -> AppendFuture<'a>;
}

/// Newline-delimited JSON, one record per line.
pub struct JsonLinesStore<W> {
    inner: Mutex<JsonLinesState<W>>,
}

struct JsonLinesState<W> {
    writer: W,
    written: u64,
}

impl<W: Write + Send> JsonLinesStore<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(JsonLinesState { writer, written: 0 }),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .writer
    }

    fn write_record(&self, record: &PersistedBeaconRecord) -> Result<RecordId, PersistError> {
        let line = serde_json::to_string(record)?;
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(state.writer, "{line}")?;
        state.writer.flush()?;
        state.written += 1;
        Ok(RecordId(state.written))
    }
}

impl JsonLinesStore<BufWriter<std::fs::File>> {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> Result<Self, PersistError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path = %path.display(), "saving records");
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> RecordStore for JsonLinesStore<W> {
    fn append<'a>(&'a self, record: &'a PersistedBeaconRecord) -> AppendFuture<'a> {
        Box::pin(async move { self.write_record(record) })
    }
}

/// Keeps records in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<PersistedBeaconRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<PersistedBeaconRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RecordStore for MemoryStore {
    fn append<'a>(&'a self, record: &'a PersistedBeaconRecord) -> AppendFuture<'a> {
        Box::pin(async move {
            let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            records.push(record.clone());
            Ok(RecordId(records.len() as u64))
        })
    }
}

/// Whether saving an already-saved beacon creates another record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SavePolicy {
    /// Every save appends a record, building a full history
    #[default]
    AppendAlways,
    /// Skip beacons already saved successfully during this session
    SkipSaved,
}

/// Outcome of a single save request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(RecordId),
    Skipped,
}

/// Applies a [`SavePolicy`] in front of a [`RecordStore`].
pub struct Persister {
    store: Arc<dyn RecordStore>,
    policy: SavePolicy,
    /// Identities saved or being saved in this session, under `SkipSaved`
    saved: Mutex<HashSet<String>>,
}

impl Persister {
    pub fn new(store: Arc<dyn RecordStore>, policy: SavePolicy) -> Self {
        Self {
            store,
            policy,
            saved: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> SavePolicy {
        self.policy
    }

    /// Claim `identity` for a save. False if it is already saved or in flight.
    fn reserve(&self, identity: &str) -> bool {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.to_string())
    }

    fn release(&self, identity: &str) {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity);
    }

    /// Save one snapshot entry, stamped with the current time.
    ///
    /// Failures are returned as-is and never retried. Under
    /// [`SavePolicy::SkipSaved`] the identity is claimed before the append, so
    /// concurrent saves of one beacon produce a single record.
    pub async fn save(&self, entry: &BeaconObservation) -> Result<SaveOutcome, PersistError> {
        let reserved = self.policy == SavePolicy::SkipSaved;
        if reserved && !self.reserve(&entry.identity) {
            debug!(identity = %entry.identity, "already saved, skipping");
            return Ok(SaveOutcome::Skipped);
        }

        let record = PersistedBeaconRecord::from_observation(entry, Utc::now());
        match self.store.append(&record).await {
            Ok(id) => {
                debug!(identity = %entry.identity, %id, "record added");
                Ok(SaveOutcome::Saved(id))
            }
            Err(e) => {
                if reserved {
                    self.release(&entry.identity);
                }
                warn!(identity = %entry.identity, error = %e, "error adding record");
                Err(e)
            }
        }
    }
}

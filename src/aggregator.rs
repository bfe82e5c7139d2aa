//! Latest-reading-per-beacon aggregation.
//!
//! The scanner delivers sightings on a background task while the render loop
//! reads snapshots from another. [`Aggregator`] serializes both behind a
//! single mutex; each reading for a known beacon replaces the previous one in
//! place, so the beacon keeps its position in the rendered list.

use crate::observation::BeaconObservation;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{trace, warn};

/// Reasons an observation is turned away by [`Aggregator::ingest`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("observation has an empty identity")]
    EmptyIdentity,
}

/// Insertion-ordered map from identity to the most recent observation.
#[derive(Debug, Default)]
struct BeaconSet {
    /// Position of each identity in `entries`
    index: HashMap<String, usize>,
    entries: Vec<BeaconObservation>,
}

impl BeaconSet {
    fn upsert(&mut self, observation: BeaconObservation) {
        match self.index.get(&observation.identity) {
            Some(&slot) => self.entries[slot] = observation,
            None => {
                self.index
                    .insert(observation.identity.clone(), self.entries.len());
                self.entries.push(observation);
            }
        }
    }

    fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
    }
}

/// Thread-safe, last-write-wins store of beacon observations.
#[derive(Debug, Default)]
pub struct Aggregator {
    beacons: Mutex<BeaconSet>,
}

impl Aggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    // Every mutation leaves the set consistent, so a panic on another thread
    // while the lock was held does not invalidate it.
    fn lock(&self) -> MutexGuard<'_, BeaconSet> {
        self.beacons.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the entry for `observation.identity`.
    ///
    /// The new observation replaces the old one wholesale; fields missing from
    /// it are not carried over. An observation with an empty identity is
    /// logged and rejected without touching the set.
    ///
    /// # Errors
    /// Returns [`IngestError::EmptyIdentity`] when the identity is empty.
    pub fn ingest(&self, observation: BeaconObservation) -> Result<(), IngestError> {
        if observation.identity.is_empty() {
            warn!(?observation, "dropping observation without identity");
            return Err(IngestError::EmptyIdentity);
        }

        trace!(identity = %observation.identity, rssi = observation.rssi, "ingest");
        self.lock().upsert(observation);
        Ok(())
    }

    /// Copy of every known observation, in first-seen order.
    ///
    /// The copy is taken under the lock, so it reflects exactly the ingests
    /// that completed before the call and nothing after.
    pub fn snapshot(&self) -> Vec<BeaconObservation> {
        self.lock().entries.clone()
    }

    /// Look up the current observation for one identity.
    pub fn get(&self, identity: &str) -> Option<BeaconObservation> {
        let beacons = self.lock();
        beacons
            .index
            .get(identity)
            .map(|&slot| beacons.entries[slot].clone())
    }

    /// Forget every observation.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of distinct identities currently known.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Beacon observation data structure.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse distance bucket reported alongside each reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proximity {
    Immediate,
    Near,
    Far,
    Unknown,
}

impl Proximity {
    /// Upper bound (exclusive) of the `Immediate` bucket, in meters.
    pub const IMMEDIATE_LIMIT: f64 = 0.5;
    /// Upper bound (exclusive) of the `Near` bucket, in meters.
    pub const NEAR_LIMIT: f64 = 3.0;

    /// Bucket a distance estimate. Negative or NaN distances are `Unknown`.
    pub fn from_distance(meters: f64) -> Self {
        if meters.is_nan() || meters < 0.0 {
            Proximity::Unknown
        } else if meters < Self::IMMEDIATE_LIMIT {
            Proximity::Immediate
        } else if meters < Self::NEAR_LIMIT {
            Proximity::Near
        } else {
            Proximity::Far
        }
    }

    /// Lowercase label, as stored in persisted records.
    pub fn description(&self) -> &'static str {
        match self {
            Proximity::Immediate => "immediate",
            Proximity::Near => "near",
            Proximity::Far => "far",
            Proximity::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Proximity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single sighting of a beacon.
///
/// Distance and proximity are estimates produced by the scanner; they are
/// carried as-is and never validated or smoothed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconObservation {
    /// Hardware address of the beacon, used as the aggregation key
    pub identity: String,
    /// Advertised local name, if any
    pub display_name: Option<String>,
    /// Estimated distance in meters
    pub distance_meters: f64,
    /// Distance bucket
    pub proximity: Proximity,
    /// Received signal strength in dBm
    pub rssi: i32,
}

impl BeaconObservation {
    pub fn new(
        identity: impl Into<String>,
        display_name: Option<String>,
        distance_meters: f64,
        proximity: Proximity,
        rssi: i32,
    ) -> Self {
        Self {
            identity: identity.into(),
            display_name,
            distance_meters,
            proximity,
            rssi,
        }
    }
}

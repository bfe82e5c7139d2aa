//! BLE scanner abstraction for beacons.
//!
//! Backends turn raw advertisements into [`Advertisement`] values; the shared
//! conversion in this module attaches the distance estimate and proximity
//! bucket and hands out [`BeaconObservation`]s over a channel.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::observation::{BeaconObservation, Proximity};
use thiserror::Error;
use tokio::sync::mpsc;

/// Error types for decoding advertisements.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Advertisement is truncated or its structures are inconsistent
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// Device is known to the adapter but no signal strength was reported
    #[error("No RSSI for {0}")]
    MissingRssi(String),
}

/// Convenience alias for observations or decode errors.
pub type ObservationResult = Result<BeaconObservation, DecodeError>;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error: unsupported, powered off, or access denied
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Data decoding error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    /// Backend not available (not compiled in)
    #[allow(dead_code)]
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Channel buffer size for scanner results.
pub const OBSERVATION_CHANNEL_BUFFER_SIZE: usize = 100;

/// Expected RSSI at one meter when the advertisement carries no TX power.
pub const DEFAULT_MEASURED_POWER: i16 = -59;

/// A raw sighting, before any distance estimate is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    /// Hardware address, formatted `AA:BB:CC:DD:EE:FF`
    pub address: String,
    /// Complete or shortened local name
    pub local_name: Option<String>,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Advertised TX power level in dBm
    pub tx_power: Option<i16>,
}

/// Log-distance estimate with a free-space path loss exponent of 2.
pub fn estimate_distance(rssi: i16, tx_power: i16) -> f64 {
    10f64.powf((f64::from(tx_power) - f64::from(rssi)) / 20.0)
}

impl Advertisement {
    /// Attach a distance estimate and proximity bucket.
    pub fn into_observation(self) -> BeaconObservation {
        let distance_meters =
            estimate_distance(self.rssi, self.tx_power.unwrap_or(DEFAULT_MEASURED_POWER));

        BeaconObservation {
            identity: self.address,
            display_name: self.local_name,
            distance_meters,
            proximity: Proximity::from_distance(distance_meters),
            rssi: i32::from(self.rssi),
        }
    }
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Start scanning for beacons using the specified backend.
///
/// # Arguments
/// * `backend` - The scanner backend to use
/// * `verbose` - If true, decode errors are sent as Err values; otherwise they're silently dropped.
///
/// # Returns
/// A receiver for observations (or decode errors if verbose).
pub async fn start_scan(
    backend: Backend,
    verbose: bool,
) -> Result<mpsc::Receiver<ObservationResult>, ScanError> {
    tracing::info!(%backend, "starting scan");
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan(verbose).await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan(verbose).await,
    }
}

//! `beacon-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. The core logic lives in [`crate::app`] where it can be
//! tested deterministically with an injected scanner, save action and I/O.

pub mod aggregator;
pub mod app;
pub mod mac_address;
pub mod observation;
pub mod output;
pub mod persist;
pub mod scanner;
pub mod subscription;
pub mod throttle;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use aggregator::{Aggregator, IngestError};
pub use mac_address::MacAddress;
pub use observation::{BeaconObservation, Proximity};
pub use output::{Format, OutputFormatter};
pub use persist::{PersistError, PersistedBeaconRecord, Persister, RecordStore, SavePolicy};
pub use scanner::{Backend, DecodeError, ObservationResult, ScanError};
pub use subscription::Subscription;
pub use throttle::{RefreshLimiter, parse_duration};

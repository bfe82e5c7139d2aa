use crate::observation::{BeaconObservation, Proximity};

/// A stable beacon address for unit tests.
pub const TEST_ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

/// Build an unnamed observation. Tests set `display_name` when they need it.
pub fn observation(
    identity: &str,
    distance_meters: f64,
    proximity: Proximity,
    rssi: i32,
) -> BeaconObservation {
    BeaconObservation {
        identity: identity.to_string(),
        display_name: None,
        distance_meters,
        proximity,
        rssi,
    }
}

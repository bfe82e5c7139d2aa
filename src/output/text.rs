//! Plain-text list rows.

use crate::observation::BeaconObservation;
use crate::output::OutputFormatter;

/// Three-line block per beacon:
///
/// ```text
/// MAC: AA:BB:CC:DD:EE:FF, RSSI: -60
/// distance: 2.00m, proximity: NEAR
/// Kitchen
/// ```
///
/// The last line is empty for beacons that advertise no name.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFormatter;

impl OutputFormatter for TextFormatter {
    fn format(&self, o: &BeaconObservation) -> String {
        format!(
            "MAC: {}, RSSI: {}\ndistance: {:.2}m, proximity: {}\n{}",
            o.identity,
            o.rssi,
            o.distance_meters,
            o.proximity.description().to_uppercase(),
            o.display_name.as_deref().unwrap_or_default()
        )
    }
}

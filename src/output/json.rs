//! JSON output, one object per line.

use crate::observation::BeaconObservation;
use crate::output::OutputFormatter;

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn format(&self, observation: &BeaconObservation) -> String {
        // Every field serializes infallibly
        serde_json::to_string(observation).unwrap_or_default()
    }
}

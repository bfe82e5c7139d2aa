//! Output formatters for beacon observations.
//!
//! This module provides a trait for formatting a single observation and a
//! helper that draws a whole snapshot with a header line.

pub mod json;
pub mod text;

use crate::observation::BeaconObservation;
use std::io::{self, Write};

/// Trait for formatting observations into output strings.
pub trait OutputFormatter: Send + Sync {
    /// Format one snapshot entry. The result may span several lines but
    /// carries no trailing newline.
    fn format(&self, observation: &BeaconObservation) -> String;
}

/// Available output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Format {
    /// Human-readable blocks, one per beacon
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl Format {
    pub fn formatter(self) -> Box<dyn OutputFormatter> {
        match self {
            Format::Text => Box::new(text::TextFormatter),
            Format::Json => Box::new(json::JsonFormatter),
        }
    }
}

/// Write a full redraw: a header with the beacon count, then every entry.
pub fn write_snapshot(
    formatter: &dyn OutputFormatter,
    snapshot: &[BeaconObservation],
    out: &mut dyn Write,
) -> io::Result<()> {
    writeln!(out, "-- {} beacon(s) --", snapshot.len())?;
    for observation in snapshot {
        writeln!(out, "{}", formatter.format(observation))?;
    }
    out.flush()
}

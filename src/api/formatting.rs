//! Ranging report output
//!
//! A [`RangingReport`] snapshots one finished run: every ranged beacon with
//! whatever it reported, plus either the estimated position or the reason
//! none could be produced. Text output uses one decimal place for metres.

use crate::core::{Beacon, PositionEstimate};
use crate::processing::RangingOutcome;
use serde::Serialize;

/// Result of one run in presentation form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangingReport {
    pub beacons: Vec<Beacon>,
    pub position: Option<PositionEstimate>,
    /// Set when `position` is `None`
    pub unavailable_reason: Option<String>,
}

impl RangingReport {
    pub fn from_outcome(outcome: &RangingOutcome) -> Self {
        let (position, unavailable_reason) = match &outcome.position {
            Ok(estimate) => (Some(*estimate), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            beacons: outcome.beacons.clone(),
            position,
            unavailable_reason,
        }
    }

    pub fn completed_beacons(&self) -> usize {
        self.beacons.iter().filter(|b| b.is_complete()).count()
    }
}

/// Human-readable renderer
#[derive(Debug, Clone, Default)]
pub struct TextFormatter {
    /// One line for the whole report
    pub compact: bool,
}

impl TextFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compact() -> Self {
        Self { compact: true }
    }

    pub fn format_text(&self, report: &RangingReport) -> String {
        if self.compact {
            return format!(
                "{} | {}/{} beacons",
                self.format_position(report),
                report.completed_beacons(),
                report.beacons.len()
            );
        }

        let mut output = String::from("Beacons:\n");
        if report.beacons.is_empty() {
            output.push_str("  No data\n");
        }
        for beacon in &report.beacons {
            output.push_str(&self.format_beacon(beacon));
            output.push('\n');
        }
        output.push_str(&self.format_position(report));
        output.push('\n');
        output
    }

    /// One list row per beacon
    pub fn format_beacon(&self, beacon: &Beacon) -> String {
        let reference = match beacon.reference_signal_strength {
            Some(rssi) => format!("{} dBm", rssi),
            None => "-".to_string(),
        };
        let distance = match beacon.distance {
            Some(d) => format!("{:.1} m", d),
            None => "-".to_string(),
        };
        let location = match (beacon.x_location, beacon.y_location) {
            (Some(x), Some(y)) => format!("({:.1}, {:.1})", x, y),
            _ => "-".to_string(),
        };

        format!(
            "  {} {}  RSSI: {} dBm  Reference: {}  Distance: {}  Location: {}  [{}]",
            beacon.identifier,
            beacon.display_name,
            beacon.signal_strength,
            reference,
            distance,
            location,
            beacon.session_state
        )
    }

    fn format_position(&self, report: &RangingReport) -> String {
        match (&report.position, &report.unavailable_reason) {
            (Some(p), _) => format!("Central position: ({:.1}, {:.1})", p.x, p.y),
            (None, Some(reason)) => format!("Position unavailable: {}", reason),
            (None, None) => "Position unavailable".to_string(),
        }
    }
}

/// JSON renderer
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    pub fn format_json(&self, report: &RangingReport) -> Result<String, serde_json::Error> {
        if self.pretty {
            serde_json::to_string_pretty(report)
        } else {
            serde_json::to_string(report)
        }
    }
}

//! Core data types for the beacon locator

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque transport-layer device address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(address: impl Into<String>) -> Self {
        DeviceId(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(address: &str) -> Self {
        DeviceId::new(address)
    }
}

/// Connection protocol state of a single beacon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    DiscoveringServices,
    ReadingReferenceRssi,
    ReadingX,
    ReadingY,
    Disconnecting,
    Complete,
    Failed,
}

impl SessionState {
    /// `Complete` and `Failed` end a session
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Failed)
    }

    /// True while the session holds (or is acquiring) a transport connection
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != SessionState::Idle
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::DiscoveringServices => "discovering services",
            SessionState::ReadingReferenceRssi => "reading reference rssi",
            SessionState::ReadingX => "reading x location",
            SessionState::ReadingY => "reading y location",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Complete => "complete",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A ranging target and everything learned about it so far.
///
/// `distance`, `x_location` and `y_location` stay `None` until the
/// corresponding characteristic read succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    pub identifier: DeviceId,
    pub display_name: String,
    /// RSSI sampled at discovery (dBm)
    pub signal_strength: i32,
    /// RSSI the beacon reports at one meter (dBm)
    pub reference_signal_strength: Option<i32>,
    /// Estimated distance (meters)
    pub distance: Option<f64>,
    /// Beacon x coordinate (meters)
    pub x_location: Option<f64>,
    /// Beacon y coordinate (meters)
    pub y_location: Option<f64>,
    pub session_state: SessionState,
    /// Data is already known; no connection is needed to range it
    pub preloaded: bool,
}

impl Beacon {
    pub fn new(identifier: DeviceId, display_name: impl Into<String>, signal_strength: i32) -> Self {
        Self {
            identifier,
            display_name: display_name.into(),
            signal_strength,
            reference_signal_strength: None,
            distance: None,
            x_location: None,
            y_location: None,
            session_state: SessionState::Idle,
            preloaded: false,
        }
    }

    /// Beacon whose reference RSSI and coordinates are known up front
    pub fn preloaded(
        identifier: DeviceId,
        display_name: impl Into<String>,
        signal_strength: i32,
        reference_signal_strength: i32,
        x_location: f64,
        y_location: f64,
    ) -> Self {
        Self {
            reference_signal_strength: Some(reference_signal_strength),
            x_location: Some(x_location),
            y_location: Some(y_location),
            preloaded: true,
            ..Self::new(identifier, display_name, signal_strength)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.session_state == SessionState::Complete
    }

    /// Trilateration input, available once coordinates and distance are known
    pub fn range_point(&self) -> Option<RangePoint> {
        Some(RangePoint {
            x: self.x_location?,
            y: self.y_location?,
            distance: self.distance?,
        })
    }
}

/// Known position and measured distance to the unknown point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangePoint {
    pub x: f64,
    pub y: f64,
    pub distance: f64,
}

impl RangePoint {
    pub fn new(x: f64, y: f64, distance: f64) -> Self {
        Self { x, y, distance }
    }
}

/// Estimated position of the central (meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    pub x: f64,
    pub y: f64,
}

//! Common API types and data structures

use crate::algorithms::TrilaterationError;
use crate::core::{Beacon, DeviceId, PositionEstimate, SessionState};
use crate::processing::discovery::DiscoveryEvent;
use crate::utils::ConfigError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for API operations
pub type ApiResult<T> = Result<T, RangingError>;

/// Per-beacon and run-wide ranging failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RangingError {
    #[error("could not connect to {device}: {reason}")]
    TransportConnectError { device: DeviceId, reason: String },
    #[error("service discovery failed on {device}: {reason}")]
    ServiceDiscoveryError { device: DeviceId, reason: String },
    #[error("characteristic {characteristic} on {device} is not readable")]
    CharacteristicUnreadable { device: DeviceId, characteristic: Uuid },
    #[error("reading characteristic {characteristic} on {device} failed: {reason}")]
    CharacteristicReadError {
        device: DeviceId,
        characteristic: Uuid,
        reason: String,
    },
    #[error("could not disconnect from {device}: {reason}")]
    DisconnectError { device: DeviceId, reason: String },
    #[error("{device} gave no answer within {timeout_ms} ms while {state}")]
    SessionTimeout {
        device: DeviceId,
        state: SessionState,
        timeout_ms: u32,
    },
    #[error("connection to {device} dropped while {state}")]
    ConnectionLost { device: DeviceId, state: SessionState },
    #[error("ranging of {device} was cancelled")]
    Cancelled { device: DeviceId },
    #[error(transparent)]
    DegenerateTrilaterationInput(#[from] TrilaterationError),
    #[error("only {available} of {required} beacons completed ranging")]
    InsufficientBeacons { available: usize, required: usize },
    #[error("a ranging run is already in progress")]
    RunInProgress,
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),
}

/// Output of the core, addressed to the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum RangingNotice {
    BeaconListChanged(Vec<Beacon>),
    /// A beacon reached `Complete` or `Failed`
    BeaconRangingComplete(Beacon),
    PositionEstimated(PositionEstimate),
    PositionUnavailable(RangingError),
}

/// Input from the scanning subsystem
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    DeviceDiscovered(DiscoveryEvent),
    ScanStopped,
}

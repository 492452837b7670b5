//! Beacon Locator
//!
//! Locates a central device on a 2-D plane from Bluetooth LE beacons. Nearby
//! beacons are discovered, each one is connected to in turn to read its
//! reference RSSI and coordinates, distances are estimated from signal
//! strength, and the central's position is trilaterated from three of them.

pub mod algorithms;
pub mod api;
pub mod core;
pub mod hardware;
pub mod processing;
pub mod utils;

// Re-export commonly used types
pub use algorithms::{DistanceEstimator, TrilaterationError, Trilaterator};
pub use api::{
    ApiResult, CallbackHandle, CallbackRangingApi, JsonFormatter, RangingError, RangingNotice, RangingReport,
    ScanEvent, TextFormatter,
};
pub use core::{Beacon, DeviceId, PositionEstimate, RangePoint, SessionState};
pub use hardware::{GattTransport, MockTransport, SessionHandle, TransportEvent};
pub use processing::{AdmitDecision, DiscoveryEvent, DiscoveryFilter, RangingSequencer, SequencerPhase};
pub use utils::{ConfigurationManager, RangingConfig};

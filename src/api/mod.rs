//! Presentation-facing API
//!
//! The callback API owns the discovery filter, the sequencer and the
//! transport; reports render finished runs as text or JSON.

pub mod callback;
pub mod formatting;
pub mod types;

pub use callback::{
    BeaconCompleteCallback, BeaconListCallback, CallbackHandle, CallbackRangingApi, PositionCallback,
    ScanEventSender, UnavailableCallback,
};
pub use formatting::{JsonFormatter, RangingReport, TextFormatter};
pub use types::{ApiResult, RangingError, RangingNotice, ScanEvent};

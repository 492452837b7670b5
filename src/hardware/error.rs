//! Transport and value-decoding error types

use crate::core::DeviceId;
use crate::hardware::SessionHandle;
use thiserror::Error;

/// Errors returned synchronously by a transport request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The device is not known to or reachable by the transport
    #[error("device {device} is unavailable")]
    DeviceUnavailable { device: DeviceId },
    /// The session was closed or never existed
    #[error("unknown transport session {session}")]
    UnknownSession { session: SessionHandle },
    /// The stack refused to queue the request
    #[error("transport request rejected: {reason}")]
    RequestRejected { reason: String },
    /// The event channel to the owner is gone
    #[error("transport event channel closed")]
    ChannelClosed,
}

/// Result type for transport requests
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors decoding a characteristic value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("characteristic value too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("{value} m does not fit a 32-bit centimeter value")]
    OutOfRange { value: f64 },
}

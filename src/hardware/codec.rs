//! Characteristic value encoding shared with the beacon firmware
//!
//! Every ranging characteristic holds a 4-byte little-endian signed
//! integer. Coordinates are whole centimeters.

use crate::core::CENTIMETERS_PER_METER;
use crate::hardware::CodecError;

/// Encoded size of every ranging characteristic
pub const VALUE_LEN: usize = 4;

/// Decode the leading four bytes; trailing bytes are ignored
pub fn decode_i32(value: &[u8]) -> Result<i32, CodecError> {
    let bytes: [u8; VALUE_LEN] = value
        .get(..VALUE_LEN)
        .and_then(|head| head.try_into().ok())
        .ok_or(CodecError::TooShort {
            expected: VALUE_LEN,
            actual: value.len(),
        })?;
    Ok(i32::from_le_bytes(bytes))
}

pub fn encode_i32(value: i32) -> [u8; VALUE_LEN] {
    value.to_le_bytes()
}

/// Decode a centimeter coordinate into meters
pub fn decode_meters(value: &[u8]) -> Result<f64, CodecError> {
    Ok(decode_i32(value)? as f64 / CENTIMETERS_PER_METER)
}

/// Encode meters at whole-centimeter granularity
pub fn encode_meters(meters: f64) -> Result<[u8; VALUE_LEN], CodecError> {
    let centimeters = (meters * CENTIMETERS_PER_METER).round();
    if !centimeters.is_finite() || centimeters < i32::MIN as f64 || centimeters > i32::MAX as f64 {
        return Err(CodecError::OutOfRange { value: meters });
    }
    Ok(encode_i32(centimeters as i32))
}

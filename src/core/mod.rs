//! Core types and constants for the beacon locator

pub mod types;
pub mod constants;

pub use types::*;
pub use constants::*;

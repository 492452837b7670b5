//! Protocol constants and model parameters

/// Maximum number of beacons admitted to a ranging run
pub const MAX_BEACONS: usize = 3;

/// Number of completed beacons a position solve needs
pub const MIN_TRILATERATION_BEACONS: usize = 3;

/// Characteristic coordinates are transmitted in centimeters
pub const CENTIMETERS_PER_METER: f64 = 100.0;

/// Path-loss exponent for free space
pub const DEFAULT_PATH_LOSS_EXPONENT: f64 = 2.0;

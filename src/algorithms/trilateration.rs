//! Closed-form 2-D trilateration from three beacons
//!
//! Builds a local frame with its origin at the first beacon and its x-axis
//! pointing at the second, solves the circle intersection there and maps the
//! result back into the beacons' frame. Exactly three measurements are used;
//! there is no averaging over redundant beacons.

use crate::core::{PositionEstimate, RangePoint};
use nalgebra::Vector2;
use thiserror::Error;

/// Default threshold below which a denominator counts as zero
pub const DEFAULT_DEGENERACY_EPSILON: f64 = 1e-9;

/// The term that made a solve impossible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegenerateTerm {
    /// First and second beacon coincide
    Baseline,
    /// Third beacon lies on the line through the first two
    Collinear,
    /// Signed y-projection of the third beacon vanished
    Projection,
    /// An input was NaN or infinite
    NonFinite,
    /// A measured distance was zero or negative
    Distance,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrilaterationError {
    #[error("degenerate trilateration input ({term:?}, magnitude {magnitude})")]
    Degenerate { term: DegenerateTerm, magnitude: f64 },
}

/// Three-circle trilateration engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trilaterator {
    pub epsilon: f64,
}

impl Default for Trilaterator {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_DEGENERACY_EPSILON,
        }
    }
}

impl Trilaterator {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    pub fn solve(
        &self,
        p1: &RangePoint,
        p2: &RangePoint,
        p3: &RangePoint,
    ) -> Result<PositionEstimate, TrilaterationError> {
        for point in [p1, p2, p3] {
            if !(point.x.is_finite() && point.y.is_finite() && point.distance.is_finite()) {
                return Err(degenerate(DegenerateTerm::NonFinite, f64::NAN));
            }
            if point.distance <= self.epsilon {
                return Err(degenerate(DegenerateTerm::Distance, point.distance));
            }
        }

        let origin = Vector2::new(p1.x, p1.y);
        let to_second = Vector2::new(p2.x, p2.y) - origin;
        let to_third = Vector2::new(p3.x, p3.y) - origin;

        let d = to_second.norm();
        if d < self.epsilon {
            return Err(degenerate(DegenerateTerm::Baseline, d));
        }
        let ex = to_second / d;

        let i = ex.dot(&to_third);
        let off_axis = to_third - ex * i;
        let off_axis_norm = off_axis.norm();
        if off_axis_norm < self.epsilon {
            return Err(degenerate(DegenerateTerm::Collinear, off_axis_norm));
        }
        let ey = off_axis / off_axis_norm;

        let j = ey.dot(&to_third);
        if j.abs() < self.epsilon {
            return Err(degenerate(DegenerateTerm::Projection, j));
        }

        let (r1, r2, r3) = (p1.distance, p2.distance, p3.distance);
        let x = (r1.powi(2) - r2.powi(2) + d.powi(2)) / (2.0 * d);
        let y = (r1.powi(2) - r3.powi(2) + i.powi(2) + j.powi(2)) / (2.0 * j) - (i / j) * x;

        let solved = origin + ex * x + ey * y;
        Ok(PositionEstimate {
            x: solved.x,
            y: solved.y,
        })
    }

    /// Solve from the first three points of a slice
    pub fn solve_slice(&self, points: &[RangePoint]) -> Option<Result<PositionEstimate, TrilaterationError>> {
        match points {
            [p1, p2, p3, ..] => Some(self.solve(p1, p2, p3)),
            _ => None,
        }
    }
}

fn degenerate(term: DegenerateTerm, magnitude: f64) -> TrilaterationError {
    TrilaterationError::Degenerate { term, magnitude }
}

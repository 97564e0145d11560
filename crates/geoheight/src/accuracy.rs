//! Absolute accuracy figures and their conversion to covariance.

use nalgebra::{Matrix3, Vector3};

/// CE90 divided by this gives the one-sigma horizontal error.
pub const CE90_TO_SIGMA: f64 = 2.146;

/// LE90 divided by this gives the one-sigma vertical error.
pub const LE90_TO_SIGMA: f64 = 1.6449;

/// Absolute accuracy of an elevation source at a point.
#[derive(Debug, Clone, PartialEq)]
pub struct AccuracyInfo {
    /// Whether the absolute figures below are meaningful.
    pub has_absolute: bool,
    /// Absolute horizontal circular error at 90% confidence, meters.
    pub absolute_ce90: f64,
    /// Absolute vertical linear error at 90% confidence, meters.
    pub absolute_le90: f64,
    /// Name of the source that produced the figures.
    pub source: String,
}

impl AccuracyInfo {
    /// Accuracy with valid absolute CE90/LE90 figures.
    pub fn absolute(ce90: f64, le90: f64, source: impl Into<String>) -> Self {
        Self {
            has_absolute: !ce90.is_nan() && !le90.is_nan(),
            absolute_ce90: ce90,
            absolute_le90: le90,
            source: source.into(),
        }
    }

    /// Whether the figures can be used for error propagation.
    pub fn is_valid(&self) -> bool {
        self.has_absolute
    }

    /// ENU covariance for these figures.
    pub fn covariance(&self) -> Matrix3<f64> {
        enu_covariance(self.absolute_ce90, self.absolute_le90)
    }
}

/// Diagonal ENU covariance from 90% circular and linear errors.
///
/// The two horizontal terms are equal and cross-correlation is zero.
pub fn enu_covariance(ce90: f64, le90: f64) -> Matrix3<f64> {
    let sigma_h = ce90 / CE90_TO_SIGMA;
    let sigma_v = le90 / LE90_TO_SIGMA;
    Matrix3::from_diagonal(&Vector3::new(
        sigma_h * sigma_h,
        sigma_h * sigma_h,
        sigma_v * sigma_v,
    ))
}

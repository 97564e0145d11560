//! Geoid offset providers used for mean-sea-level / ellipsoid conversions.

use crate::geo::GeoPoint;
use std::fmt::Debug;

/// Vertical separation between the ellipsoid and mean sea level.
///
/// `offset_from_ellipsoid` returns the height of the geoid above the
/// ellipsoid at a point, so `hae = msl + offset`. Implementations return NaN
/// where they have no value.
pub trait GeoidModel: Send + Sync + Debug {
    /// Geoid height above the ellipsoid at `point`, in meters.
    fn offset_from_ellipsoid(&self, point: &GeoPoint) -> f64;
}

/// A geoid coincident with the ellipsoid everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityGeoid;

impl GeoidModel for IdentityGeoid {
    fn offset_from_ellipsoid(&self, _point: &GeoPoint) -> f64 {
        0.0
    }
}

/// A geoid with the same separation everywhere.
#[derive(Debug, Clone, Copy)]
pub struct ConstantGeoid(pub f64);

impl GeoidModel for ConstantGeoid {
    fn offset_from_ellipsoid(&self, _point: &GeoPoint) -> f64 {
        self.0
    }
}

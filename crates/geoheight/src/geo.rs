//! Geodetic points, rectangles and local-frame rotations on the WGS-84 ellipsoid.

use nalgebra::{Matrix3, Vector3};

/// WGS-84 semi-major axis in meters.
pub const WGS84_A: f64 = 6_378_137.0;

/// WGS-84 first eccentricity squared.
pub const WGS84_E2: f64 = 6.694_379_990_141_3e-3;

/// A geodetic position.
///
/// Latitude and longitude are decimal degrees (positive north / east). The
/// height is meters above the ellipsoid and is ignored by elevation lookups,
/// which only use the horizontal position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lon: f64,
    /// Height above the ellipsoid in meters.
    pub hgt: f64,
}

impl GeoPoint {
    /// Create a point at the given latitude and longitude with zero height.
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon, hgt: 0.0 }
    }

    /// Return a copy of this point shifted by the given degree offsets.
    pub fn offset(&self, dlat: f64, dlon: f64) -> Self {
        Self {
            lat: self.lat + dlat,
            lon: self.lon + dlon,
            hgt: self.hgt,
        }
    }

    /// Whether either horizontal coordinate is NaN.
    pub fn has_nans(&self) -> bool {
        self.lat.is_nan() || self.lon.is_nan()
    }

    /// Meters spanned by one degree of (latitude, longitude) at this point.
    ///
    /// Uses the WGS-84 meridional and prime-vertical radii of curvature.
    pub fn meters_per_degree(&self) -> (f64, f64) {
        let phi = self.lat.to_radians();
        let sin_phi = phi.sin();
        let w2 = 1.0 - WGS84_E2 * sin_phi * sin_phi;
        let meridional = WGS84_A * (1.0 - WGS84_E2) / w2.powf(1.5);
        let prime_vertical = WGS84_A / w2.sqrt();
        let rad = std::f64::consts::PI / 180.0;
        (meridional * rad, prime_vertical * phi.cos() * rad)
    }

    /// Rotation taking East-North-Up vectors at this point into ECEF.
    ///
    /// The columns are the east, north and up unit vectors expressed in
    /// Earth-Centered-Earth-Fixed coordinates.
    pub fn enu_to_ecef_rotation(&self) -> Matrix3<f64> {
        let (sin_phi, cos_phi) = self.lat.to_radians().sin_cos();
        let (sin_lam, cos_lam) = self.lon.to_radians().sin_cos();

        let east = Vector3::new(-sin_lam, cos_lam, 0.0);
        let north = Vector3::new(-sin_phi * cos_lam, -sin_phi * sin_lam, cos_phi);
        let up = Vector3::new(cos_phi * cos_lam, cos_phi * sin_lam, sin_phi);

        Matrix3::from_columns(&[east, north, up])
    }
}

/// A north-up geographic rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoRect {
    /// Minimum latitude (south edge).
    pub min_lat: f64,
    /// Maximum latitude (north edge).
    pub max_lat: f64,
    /// Minimum longitude (west edge).
    pub min_lon: f64,
    /// Maximum longitude (east edge).
    pub max_lon: f64,
}

impl GeoRect {
    /// Create a rectangle from its edges.
    pub const fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    /// Check if a coordinate is within the rectangle (edges inclusive).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    /// Check if a point is within the rectangle.
    pub fn contains_point(&self, point: &GeoPoint) -> bool {
        self.contains(point.lat, point.lon)
    }

    /// Whether the two rectangles share any area or edge.
    pub fn intersects(&self, other: &GeoRect) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &GeoRect) -> GeoRect {
        GeoRect {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lon: self.min_lon.min(other.min_lon),
            max_lon: self.max_lon.max(other.max_lon),
        }
    }
}

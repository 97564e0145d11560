//! Reference surfaces for ground intersection and their uncertainty.
//!
//! A [`HeightReference`] is either a constant height above the ellipsoid or
//! the terrain served by an [`ElevationManager`]. Besides the height itself
//! it provides the local surface normal and the covariance of the surface
//! position, which callers use to propagate terrain error into ground
//! coordinates.

use crate::accuracy::enu_covariance;
use crate::geo::GeoPoint;
use crate::manager::ElevationManager;
use nalgebra::{Matrix3, Vector3};
use std::sync::Arc;
use tracing::warn;

/// CE90 assumed for a fixed-height reference.
const FIXED_CE90: f64 = 0.0;
/// LE90 assumed for a fixed-height reference.
const FIXED_LE90: f64 = 0.01;

/// CE90 assumed when the terrain reports no accuracy (SRTM-class).
pub const DEFAULT_DEM_CE90: f64 = 20.0;
/// LE90 assumed when the terrain reports no accuracy (SRTM-class).
pub const DEFAULT_DEM_LE90: f64 = 16.0;

/// Spacing of the height samples used to estimate the terrain normal.
const NORMAL_SAMPLE_SPACING_M: f64 = 100.0;

/// The surface heights are measured against.
#[derive(Debug, Clone)]
pub enum HeightReference {
    /// A constant height above the ellipsoid, in meters.
    Fixed(f64),
    /// Terrain heights from an elevation manager.
    Dem(Arc<ElevationManager>),
}

impl HeightReference {
    /// Height above the ellipsoid of the reference surface at `point`.
    ///
    /// Only the horizontal position of `point` is used. NaN if the terrain
    /// has no value there.
    pub fn ref_height(&self, point: &GeoPoint) -> f64 {
        match self {
            Self::Fixed(height) => *height,
            Self::Dem(manager) => manager.height_above_ellipsoid(point),
        }
    }

    /// ENU covariance of the reference surface at `point`.
    ///
    /// DEM references use the accuracy reported by the terrain, or the
    /// SRTM-class defaults when none is available.
    pub fn surface_cov_matrix(&self, point: &GeoPoint) -> Matrix3<f64> {
        match self {
            Self::Fixed(_) => Self::surface_cov_matrix_from(FIXED_CE90, FIXED_LE90),
            Self::Dem(manager) => match manager.accuracy_info(point) {
                Some(info) if info.is_valid() => info.covariance(),
                _ => Self::surface_cov_matrix_from(DEFAULT_DEM_CE90, DEFAULT_DEM_LE90),
            },
        }
    }

    /// ENU covariance for explicit CE90/LE90 figures.
    pub fn surface_cov_matrix_from(ce90: f64, le90: f64) -> Matrix3<f64> {
        enu_covariance(ce90, le90)
    }

    /// Unit normal of the reference surface at `point`, in ENU.
    ///
    /// Fixed references are level. For terrain, heights are sampled on a
    /// 3x3 grid spaced 100 m apart and the slopes come from a Sobel
    /// operator. Missing samples or a degenerate normal give the vertical.
    pub fn local_terrain_normal(&self, point: &GeoPoint) -> Vector3<f64> {
        let manager = match self {
            Self::Fixed(_) => return Vector3::z(),
            Self::Dem(manager) => manager,
        };

        let (lat_m, lon_m) = point.meters_per_degree();
        let dlat = NORMAL_SAMPLE_SPACING_M / lat_m;
        let dlon = NORMAL_SAMPLE_SPACING_M / lon_m;

        // h[i][j]: i steps south to north, j steps west to east
        let mut h = [[0.0; 3]; 3];
        for (i, row) in h.iter_mut().enumerate() {
            for (j, sample) in row.iter_mut().enumerate() {
                let sample_point = point.offset((i as f64 - 1.0) * dlat, (j as f64 - 1.0) * dlon);
                *sample = manager.height_above_ellipsoid(&sample_point);
            }
        }

        if h.iter().flatten().any(|sample| sample.is_nan()) {
            warn!(
                lat = point.lat,
                lon = point.lon,
                "missing terrain around point; using vertical normal"
            );
            return Vector3::z();
        }

        let scale = 8.0 * NORMAL_SAMPLE_SPACING_M;
        let dz_dlon = ((h[0][2] + 2.0 * h[1][2] + h[2][2]) - (h[0][0] + 2.0 * h[1][0] + h[2][0])) / scale;
        let dz_dlat = ((h[2][0] + 2.0 * h[2][1] + h[2][2]) - (h[0][0] + 2.0 * h[0][1] + h[0][2])) / scale;

        let normal = Vector3::new(
            -dz_dlon,
            -dz_dlat,
            1.0 - (dz_dlon * dz_dlon + dz_dlat * dz_dlat).sqrt(),
        );
        match normal.try_normalize(f64::EPSILON) {
            Some(unit) if unit.iter().all(|c| c.is_finite()) => unit,
            _ => {
                warn!(
                    lat = point.lat,
                    lon = point.lon,
                    "degenerate terrain normal; using vertical normal"
                );
                Vector3::z()
            }
        }
    }

    /// ECEF covariance of the surface position along the terrain normal.
    ///
    /// `enu_cov` is rotated into ECEF together with the local normal `n`;
    /// the variance along the normal, `nᵀ C n`, is returned as the rank-one
    /// matrix `n var nᵀ`.
    pub fn surface_normal_cov_matrix(&self, point: &GeoPoint, enu_cov: &Matrix3<f64>) -> Matrix3<f64> {
        let rotation = point.enu_to_ecef_rotation();
        let ecef_cov = rotation * enu_cov * rotation.transpose();
        let normal = rotation * self.local_terrain_normal(point);
        let variance = normal.dot(&(ecef_cov * normal));
        normal * variance * normal.transpose()
    }
}

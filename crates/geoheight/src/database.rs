//! The elevation database contract shared by every source type.

use crate::accuracy::AccuracyInfo;
use crate::cache::CacheLimits;
use crate::geo::{GeoPoint, GeoRect};
use crate::geoid::{GeoidModel, IdentityGeoid};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Per-database options.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Open-cell limits for the database's cache.
    pub limits: CacheLimits,
    /// Absolute (CE90, LE90) accuracy of the source in meters, if known.
    pub absolute_accuracy: Option<(f64, f64)>,
    /// Geoid used to turn MSL heights into ellipsoid heights.
    pub geoid: Arc<dyn GeoidModel>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            limits: CacheLimits::default(),
            absolute_accuracy: None,
            geoid: Arc::new(IdentityGeoid),
        }
    }
}

/// A source of terrain heights over some part of the globe.
///
/// Queries never fail: a point without data yields NaN (heights), `false`
/// (coverage) or `None` (accuracy). Open and decode failures are absorbed
/// inside the database.
pub trait ElevationDatabase: Send + Sync + Debug {
    /// Connection path the database was opened from.
    fn connection(&self) -> &Path;

    /// Options the database was opened with.
    fn settings(&self) -> &DatabaseSettings;

    /// Height above mean sea level at `point`, NaN if unavailable.
    fn height_above_msl(&self, point: &GeoPoint) -> f64;

    /// Coarse coverage test.
    ///
    /// May report a false positive for rotated rasters; the precise test
    /// happens when a cell is opened.
    fn point_has_coverage(&self, point: &GeoPoint) -> bool;

    /// Paths of every known cell file intersecting `rect`.
    fn cells_for_bounds(&self, rect: &GeoRect) -> Vec<PathBuf>;

    /// Number of currently open cells.
    fn open_cell_count(&self) -> usize;

    /// Close every open cell.
    fn flush_cache(&self);

    /// Height above the ellipsoid: the MSL height plus the geoid offset.
    ///
    /// The offset is left out where the geoid has no value.
    fn height_above_ellipsoid(&self, point: &GeoPoint) -> f64 {
        let height = self.height_above_msl(point);
        if height.is_nan() {
            return height;
        }
        let offset = self.settings().geoid.offset_from_ellipsoid(point);
        if offset.is_nan() {
            height
        } else {
            height + offset
        }
    }

    /// Absolute accuracy at `point`, when the source has configured figures
    /// and covers the point.
    fn accuracy_info(&self, point: &GeoPoint) -> Option<AccuracyInfo> {
        let (ce90, le90) = self.settings().absolute_accuracy?;
        if !self.point_has_coverage(point) {
            return None;
        }
        let info = AccuracyInfo::absolute(ce90, le90, self.connection().display().to_string());
        info.is_valid().then_some(info)
    }
}

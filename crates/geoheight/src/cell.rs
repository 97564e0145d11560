//! The cell contract: one opened elevation raster.

use crate::geo::{GeoPoint, GeoRect};
use crate::{ElevationError, Result};
use geoheight_metrics::metric_defs;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// An opened backing elevation raster.
///
/// Cells are shared by `Arc` between a database's cache and the queries
/// currently reading them, so an evicted cell stays valid until the last
/// query drops its reference.
pub trait ElevationCell: Send + Sync + Debug {
    /// Whether the backing raster is still readable.
    fn is_open(&self) -> bool {
        true
    }

    /// North-up geographic rectangle enclosing the cell's footprint.
    fn bounding_rect(&self) -> GeoRect;

    /// Precise, format-aware coverage test.
    ///
    /// May be stricter than [`bounding_rect`](Self::bounding_rect) for
    /// rotated rasters or rasters with null regions.
    fn point_has_coverage(&self, point: &GeoPoint) -> bool {
        self.bounding_rect().contains_point(point)
    }

    /// Height above mean sea level at `point` in meters, NaN for no data.
    ///
    /// Only meaningful when [`point_has_coverage`](Self::point_has_coverage)
    /// holds for `point`.
    fn height_above_msl(&self, point: &GeoPoint) -> f64;
}

/// Opens cells from files.
pub trait CellOpener: Send + Sync + Debug {
    /// Open the raster at `path`.
    fn open(&self, path: &Path) -> Result<Arc<dyn ElevationCell>>;

    /// Whether `path` looks like a file this opener can read.
    ///
    /// Used to filter directory enumeration; it must not touch the file.
    fn accepts(&self, path: &Path) -> bool;
}

/// Open `path` for `database`, logging and counting the outcome.
///
/// A cell that opens but reports itself closed counts as a failure.
pub(crate) fn open_cell(
    opener: &dyn CellOpener,
    path: &Path,
    database: &str,
) -> Option<Arc<dyn ElevationCell>> {
    let result = opener.open(path).and_then(|cell| {
        if cell.is_open() {
            Ok(cell)
        } else {
            Err(ElevationError::InvalidGeoTiff(format!(
                "{} did not stay open",
                path.display()
            )))
        }
    });

    match result {
        Ok(cell) => {
            debug!(database, path = %path.display(), "opened elevation cell");
            metrics::counter!(metric_defs::CELL_OPENS.name, "database" => database.to_string())
                .increment(1);
            Some(cell)
        }
        Err(err) => {
            warn!(
                database,
                path = %path.display(),
                error = %err,
                "failed to open elevation cell; dropping it"
            );
            metrics::counter!(metric_defs::CELL_OPEN_FAILURES.name, "database" => database.to_string())
                .increment(1);
            None
        }
    }
}

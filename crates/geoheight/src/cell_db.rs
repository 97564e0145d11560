//! Directory of 1°x1° cells named after their north-west corner.
//!
//! Files such as `USGS_13_n48w123_20240327.tif` are indexed by the cell key
//! in their name, so a query goes straight to the one file that can cover
//! it instead of scanning a catalog.

use crate::cache::CellCache;
use crate::cell::{open_cell, CellOpener, ElevationCell};
use crate::database::{DatabaseSettings, ElevationDatabase};
use crate::geo::{GeoPoint, GeoRect};
use crate::{ElevationError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Key of a 1°x1° cell: its north-west corner in whole degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    /// Latitude of the north edge.
    pub lat: i32,
    /// Longitude of the west edge.
    pub lon: i32,
}

impl CellKey {
    /// Key of the cell containing a coordinate.
    ///
    /// For example, (47.5, -122.5) is in cell n48w123. Points on a whole
    /// degree of latitude belong to the cell to their south.
    pub fn from_point(lat: f64, lon: f64) -> Option<Self> {
        if lat.is_nan() || lon.is_nan() {
            return None;
        }
        Some(Self {
            lat: lat.ceil() as i32,
            lon: lon.floor() as i32,
        })
    }

    /// Parse a key from a file name containing `n48w123` or `s14e170`.
    ///
    /// Matching is case-insensitive and the first well-formed occurrence
    /// wins.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let name = filename.to_ascii_lowercase();
        let bytes = name.as_bytes();
        (0..bytes.len()).find_map(|start| Self::parse_at(&bytes[start..]))
    }

    fn parse_at(s: &[u8]) -> Option<Self> {
        let (north, rest) = match s.split_first()? {
            (b'n', rest) => (true, rest),
            (b's', rest) => (false, rest),
            _ => return None,
        };
        let (lat, rest) = leading_number(rest)?;
        let (west, rest) = match rest.split_first()? {
            (b'w', rest) => (true, rest),
            (b'e', rest) => (false, rest),
            _ => return None,
        };
        let (lon, _) = leading_number(rest)?;
        if lat > 90 || lon > 180 {
            return None;
        }

        Some(Self {
            lat: if north { lat } else { -lat },
            lon: if west { -lon } else { lon },
        })
    }

    /// Geographic bounds of the cell.
    pub fn bounds(&self) -> GeoRect {
        GeoRect::new(
            f64::from(self.lat - 1),
            f64::from(self.lat),
            f64::from(self.lon),
            f64::from(self.lon + 1),
        )
    }
}

/// Up to three leading ASCII digits and the remainder.
fn leading_number(s: &[u8]) -> Option<(i32, &[u8])> {
    let digits = s.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 || digits > 3 {
        return None;
    }
    let value = s[..digits]
        .iter()
        .fold(0, |acc, d| acc * 10 + i32::from(d - b'0'));
    Some((value, &s[digits..]))
}

/// Elevation database over a directory of 1°x1° cells.
///
/// The directory is indexed when the database opens, which is fast because
/// only file names are read. Cells are loaded on first use and kept in an
/// LRU cache keyed by [`CellKey`].
#[derive(Debug)]
pub struct GridCellDatabase {
    connection: PathBuf,
    settings: DatabaseSettings,
    opener: Arc<dyn CellOpener>,
    /// Available cell files indexed by key.
    index: Mutex<BTreeMap<CellKey, PathBuf>>,
    cache: CellCache<CellKey>,
}

impl GridCellDatabase {
    /// Index every accepted, cell-named file directly inside `dir`.
    ///
    /// Fails if `dir` is not a directory, holds no cell files, or holds an
    /// accepted raster that is not named like a cell.
    pub fn open(
        dir: impl Into<PathBuf>,
        settings: DatabaseSettings,
        opener: Arc<dyn CellOpener>,
    ) -> Result<Self> {
        let connection = dir.into();
        if !connection.is_dir() {
            return Err(ElevationError::NotADirectory(connection));
        }

        let database = Self {
            cache: CellCache::new(connection.display().to_string(), settings.limits),
            connection,
            settings,
            opener,
            index: Mutex::new(BTreeMap::new()),
        };

        let mut count = 0;
        for entry in std::fs::read_dir(&database.connection)? {
            let path = entry?.path();
            if !path.is_file() || !database.opener.accepts(&path) {
                continue;
            }
            match database.add_file(path.clone()) {
                Ok(_) => count += 1,
                // Directories with other rasters are left to the image catalog
                Err(ElevationError::InvalidFilename(_)) => {
                    return Err(ElevationError::MixedDirectory(database.connection, path));
                }
                Err(err) => return Err(err),
            }
        }

        if count == 0 {
            return Err(ElevationError::EmptyCatalog(database.connection));
        }
        info!(
            connection = %database.connection.display(),
            cells = count,
            "opened grid cell database"
        );
        Ok(database)
    }

    /// Add a single cell file to the index.
    ///
    /// Only the file name is inspected. A later file with the same key
    /// replaces the earlier one.
    pub fn add_file(&self, path: PathBuf) -> Result<CellKey> {
        if !self.opener.accepts(&path) {
            return Err(ElevationError::UnrecognizedSource(path));
        }
        let key = path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(CellKey::from_filename)
            .ok_or_else(|| ElevationError::InvalidFilename(path.display().to_string()))?;

        self.index.lock().insert(key, path);
        Ok(key)
    }

    /// Number of indexed cells, loaded or not.
    pub fn cell_count(&self) -> usize {
        self.index.lock().len()
    }

    /// Bounding box of every indexed cell, without loading any.
    pub fn total_bounds(&self) -> Option<GeoRect> {
        self.index
            .lock()
            .keys()
            .map(CellKey::bounds)
            .reduce(|acc, bounds| acc.union(&bounds))
    }

    fn cell_for(&self, point: &GeoPoint) -> Option<Arc<dyn ElevationCell>> {
        let key = CellKey::from_point(point.lat, point.lon)?;
        if let Some(cell) = self.cache.get(&key) {
            return Some(cell);
        }

        // Hold the index lock across the open so a cell is loaded only once
        let mut index = self.index.lock();
        if let Some(cell) = self.cache.get(&key) {
            return Some(cell);
        }
        let path = index.get(&key)?;

        match open_cell(self.opener.as_ref(), path, self.cache.name()) {
            Some(cell) => {
                self.cache.insert(key, Arc::clone(&cell));
                Some(cell)
            }
            None => {
                index.remove(&key);
                None
            }
        }
    }
}

impl ElevationDatabase for GridCellDatabase {
    fn connection(&self) -> &Path {
        &self.connection
    }

    fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    fn height_above_msl(&self, point: &GeoPoint) -> f64 {
        match self.cell_for(point) {
            Some(cell) if cell.point_has_coverage(point) => cell.height_above_msl(point),
            _ => f64::NAN,
        }
    }

    fn point_has_coverage(&self, point: &GeoPoint) -> bool {
        CellKey::from_point(point.lat, point.lon)
            .is_some_and(|key| self.index.lock().contains_key(&key))
    }

    fn cells_for_bounds(&self, rect: &GeoRect) -> Vec<PathBuf> {
        self.index
            .lock()
            .iter()
            .filter(|(key, _)| key.bounds().intersects(rect))
            .map(|(_, path)| path.clone())
            .collect()
    }

    fn open_cell_count(&self) -> usize {
        self.cache.len()
    }

    fn flush_cache(&self) {
        self.cache.clear();
    }
}

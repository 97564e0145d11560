//! YAML configuration for the elevation manager.
//!
//! ```yaml
//! enabled: true
//! default_height_above_ellipsoid: null
//! elevation_offset: null
//! use_geoid_if_null: false
//! min_open_cells: 5
//! max_open_cells: 25
//! search_paths: [/data/elevation]
//! databases:
//!   - connection: /data/dted
//!     absolute_ce90: 20.0
//!     absolute_le90: 16.0
//! ```

use crate::cache::{CacheLimits, DEFAULT_MAX_OPEN_CELLS, DEFAULT_MIN_OPEN_CELLS};
use crate::database::DatabaseSettings;
use crate::geoid::GeoidModel;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable listing extra search paths, separated like `PATH`.
pub const ELEVATION_PATH_ENV: &str = "GEOHEIGHT_ELEVATION_PATH";

/// Elevation manager configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ElevationConfig {
    /// Master switch; a disabled manager answers every query with NaN.
    pub enabled: bool,
    /// Height returned when no database has data.
    pub default_height_above_ellipsoid: Option<f64>,
    /// Bias added to every non-NaN result.
    pub elevation_offset: Option<f64>,
    /// Fall back to the geoid when no database has data.
    pub use_geoid_if_null: bool,
    /// Default low-water mark for each database's cell cache.
    pub min_open_cells: usize,
    /// Default high-water mark for each database's cell cache.
    pub max_open_cells: usize,
    /// Directories scanned for elevation sources.
    pub search_paths: Vec<PathBuf>,
    /// Explicitly configured databases, in priority order.
    pub databases: Vec<DatabaseConfig>,
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_height_above_ellipsoid: None,
            elevation_offset: None,
            use_geoid_if_null: false,
            min_open_cells: DEFAULT_MIN_OPEN_CELLS,
            max_open_cells: DEFAULT_MAX_OPEN_CELLS,
            search_paths: Vec::new(),
            databases: Vec::new(),
        }
    }
}

/// One explicitly configured database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Path of the directory or file to open.
    pub connection: PathBuf,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Overrides the global low-water mark.
    #[serde(default)]
    pub min_open_cells: Option<usize>,
    /// Overrides the global high-water mark.
    #[serde(default)]
    pub max_open_cells: Option<usize>,
    #[serde(default)]
    pub absolute_ce90: Option<f64>,
    #[serde(default)]
    pub absolute_le90: Option<f64>,
}

fn default_enabled() -> bool {
    true
}

impl DatabaseConfig {
    /// An enabled entry with no overrides.
    pub fn new(connection: impl Into<PathBuf>) -> Self {
        Self {
            connection: connection.into(),
            enabled: true,
            min_open_cells: None,
            max_open_cells: None,
            absolute_ce90: None,
            absolute_le90: None,
        }
    }
}

impl ElevationConfig {
    /// Parse a configuration from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Serialize the configuration to YAML.
    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Cache limits applied to databases without overrides.
    pub fn cache_limits(&self) -> CacheLimits {
        CacheLimits::new(self.min_open_cells, self.max_open_cells)
    }

    /// Settings for a database, applying per-entry overrides to the global
    /// defaults.
    ///
    /// Accuracy is only set when both CE90 and LE90 are configured.
    pub fn database_settings_for(
        &self,
        database: Option<&DatabaseConfig>,
        geoid: Arc<dyn GeoidModel>,
    ) -> DatabaseSettings {
        let Some(database) = database else {
            return DatabaseSettings {
                limits: self.cache_limits(),
                absolute_accuracy: None,
                geoid,
            };
        };

        let limits = CacheLimits::new(
            database.min_open_cells.unwrap_or(self.min_open_cells),
            database.max_open_cells.unwrap_or(self.max_open_cells),
        );
        let absolute_accuracy = database.absolute_ce90.zip(database.absolute_le90);
        DatabaseSettings {
            limits,
            absolute_accuracy,
            geoid,
        }
    }

    /// Configured search paths followed by those from
    /// [`ELEVATION_PATH_ENV`].
    pub fn all_search_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.search_paths.clone();
        if let Some(value) = std::env::var_os(ELEVATION_PATH_ENV) {
            paths.extend(std::env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()));
        }
        paths
    }
}

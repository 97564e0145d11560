//! # geoheight
//!
//! On-demand terrain heights for geodetic coordinates.
//!
//! Heights come from any number of elevation databases queried in priority
//! order. Each database lazily opens the raster cells it needs and keeps a
//! bounded number of them open, evicting the least recently used. Callers
//! that need error propagation get absolute accuracy figures, terrain
//! normals and covariance matrices through [`HeightReference`].
//!
//! ## Layers
//!
//! - [`ElevationCell`]: one opened raster ([`GeoTiffCell`] for GeoTIFF).
//! - [`CellCache`]: bounded LRU map of open cells, one per database.
//! - [`ElevationDatabase`]: a source of heights.
//!   [`ImageElevationDatabase`] catalogs arbitrary raster files and
//!   discovers their footprints lazily; [`GridCellDatabase`] indexes a
//!   directory of 1°x1° cells named like `USGS_13_n48w123_*.tif`.
//! - [`ElevationManager`]: ordered databases plus the fallback policy.
//! - [`HeightReference`]: fixed height or terrain, with normals and
//!   covariance.
//!
//! ## Example
//!
//! ```no_run
//! use geoheight::{DatabaseRegistry, ElevationConfig, ElevationManager, GeoPoint, HeightReference};
//! use std::sync::Arc;
//!
//! let config = ElevationConfig::from_yaml_str("search_paths: [dem_data]")?;
//! let manager = Arc::new(ElevationManager::from_config(config));
//! manager.initialize(&DatabaseRegistry::with_defaults());
//!
//! let point = GeoPoint::new(47.6062, -122.3321);
//! println!("HAE: {:.1} m", manager.height_above_ellipsoid(&point));
//!
//! let reference = HeightReference::Dem(Arc::clone(&manager));
//! let normal = reference.local_terrain_normal(&point);
//! let cov = reference.surface_normal_cov_matrix(&point, &reference.surface_cov_matrix(&point));
//! println!("normal {normal:?}, covariance {cov:?}");
//! # Ok::<(), geoheight::ElevationError>(())
//! ```

pub mod accuracy;
pub mod cache;
pub mod cell;
pub mod cell_db;
pub mod config;
pub mod database;
pub mod enumerator;
mod error;
pub mod geo;
pub mod geoid;
pub mod geotiff;
pub mod height_ref;
pub mod image_db;
pub mod manager;
pub mod registry;

pub use accuracy::AccuracyInfo;
pub use cache::{CacheLimits, CellCache};
pub use cell::{CellOpener, ElevationCell};
pub use cell_db::{CellKey, GridCellDatabase};
pub use config::{DatabaseConfig, ElevationConfig};
pub use database::{DatabaseSettings, ElevationDatabase};
pub use enumerator::{BackgroundEnumerator, DirectoryEnumerator, FileEnumerator};
pub use error::ElevationError;
pub use geo::{GeoPoint, GeoRect};
pub use geoid::{ConstantGeoid, GeoidModel, IdentityGeoid};
pub use geotiff::{GeoTiffCell, GeoTiffOpener};
pub use height_ref::HeightReference;
pub use image_db::ImageElevationDatabase;
pub use manager::ElevationManager;
pub use registry::{DatabaseFactory, DatabaseRegistry};

/// Result type for opening elevation sources.
pub type Result<T> = std::result::Result<T, ElevationError>;

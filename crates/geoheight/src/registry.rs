//! Format registry: turns a connection path into an elevation database.

use crate::cell::CellOpener;
use crate::cell_db::GridCellDatabase;
use crate::database::{DatabaseSettings, ElevationDatabase};
use crate::enumerator::{DirectoryEnumerator, FileEnumerator};
use crate::geotiff::GeoTiffOpener;
use crate::image_db::ImageElevationDatabase;
use crate::{ElevationError, Result};
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Opens one kind of elevation database.
pub trait DatabaseFactory: Send + Sync + Debug {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Try to open `path` as this kind of database.
    fn open(&self, path: &Path, settings: &DatabaseSettings) -> Result<Arc<dyn ElevationDatabase>>;
}

/// Directories of `n48w123`-named 1°x1° cells.
#[derive(Debug, Clone)]
pub struct GridCellFactory {
    opener: Arc<dyn CellOpener>,
}

impl GridCellFactory {
    pub fn new(opener: Arc<dyn CellOpener>) -> Self {
        Self { opener }
    }
}

impl DatabaseFactory for GridCellFactory {
    fn name(&self) -> &str {
        "grid-cell"
    }

    fn open(&self, path: &Path, settings: &DatabaseSettings) -> Result<Arc<dyn ElevationDatabase>> {
        let database = GridCellDatabase::open(path, settings.clone(), Arc::clone(&self.opener))?;
        Ok(Arc::new(database))
    }
}

/// Arbitrary raster files under a directory tree, or a single file.
#[derive(Debug, Clone)]
pub struct ImageCatalogFactory {
    opener: Arc<dyn CellOpener>,
    enumerator: Arc<dyn FileEnumerator>,
}

impl ImageCatalogFactory {
    pub fn new(opener: Arc<dyn CellOpener>, enumerator: Arc<dyn FileEnumerator>) -> Self {
        Self { opener, enumerator }
    }
}

impl DatabaseFactory for ImageCatalogFactory {
    fn name(&self) -> &str {
        "image-catalog"
    }

    fn open(&self, path: &Path, settings: &DatabaseSettings) -> Result<Arc<dyn ElevationDatabase>> {
        let database = ImageElevationDatabase::open(
            path,
            settings.clone(),
            Arc::clone(&self.opener),
            self.enumerator.as_ref(),
        )?;
        Ok(Arc::new(database))
    }
}

/// Ordered list of database factories.
///
/// A path is offered to each factory in registration order and the first
/// one that opens it wins.
#[derive(Debug, Clone, Default)]
pub struct DatabaseRegistry {
    factories: Vec<Arc<dyn DatabaseFactory>>,
}

impl DatabaseRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// GeoTIFF grid-cell directories first, then GeoTIFF image catalogs.
    pub fn with_defaults() -> Self {
        let opener: Arc<dyn CellOpener> = Arc::new(GeoTiffOpener);
        let mut registry = Self::new();
        registry.register(Arc::new(GridCellFactory::new(Arc::clone(&opener))));
        registry.register(Arc::new(ImageCatalogFactory::new(
            opener,
            Arc::new(DirectoryEnumerator::default()),
        )));
        registry
    }

    /// Append a factory.
    pub fn register(&mut self, factory: Arc<dyn DatabaseFactory>) {
        self.factories.push(factory);
    }

    /// Number of registered factories.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether no factory is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Open `path` with the first factory that accepts it.
    pub fn open(&self, path: &Path, settings: &DatabaseSettings) -> Result<Arc<dyn ElevationDatabase>> {
        for factory in &self.factories {
            match factory.open(path, settings) {
                Ok(database) => {
                    debug!(path = %path.display(), factory = factory.name(), "opened elevation source");
                    return Ok(database);
                }
                Err(err) => {
                    debug!(path = %path.display(), factory = factory.name(), error = %err, "factory declined");
                }
            }
        }
        Err(ElevationError::UnrecognizedSource(path.to_path_buf()))
    }
}

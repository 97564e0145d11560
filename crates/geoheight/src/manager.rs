//! The elevation manager: one entry point over every configured database.

use crate::accuracy::AccuracyInfo;
use crate::config::ElevationConfig;
use crate::database::ElevationDatabase;
use crate::geo::{GeoPoint, GeoRect};
use crate::geoid::{GeoidModel, IdentityGeoid};
use crate::registry::DatabaseRegistry;
use geoheight_metrics::metric_defs;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fallback and bias options, changeable at runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FallbackOptions {
    default_height_above_ellipsoid: Option<f64>,
    elevation_offset: Option<f64>,
    use_geoid_if_null: bool,
}

impl FallbackOptions {
    fn apply_offset(&self, height: f64) -> f64 {
        match self.elevation_offset {
            Some(offset) if !height.is_nan() => height + offset,
            _ => height,
        }
    }
}

/// Prioritized set of elevation databases with fallback policy.
///
/// Databases are queried in registration order and the first non-NaN
/// answer wins. When every database abstains the configured default height
/// or the geoid is used, and a configured bias is added to any non-NaN
/// result.
///
/// One manager is normally shared by `Arc` for the life of the process.
///
/// # Example
///
/// ```no_run
/// use geoheight::{DatabaseRegistry, ElevationConfig, ElevationManager, GeoPoint};
///
/// let config = ElevationConfig::from_file("elevation.yaml")?;
/// let manager = ElevationManager::from_config(config);
/// manager.initialize(&DatabaseRegistry::with_defaults());
///
/// let hae = manager.height_above_ellipsoid(&GeoPoint::new(47.6062, -122.3321));
/// println!("Seattle: {hae:.1} m above the ellipsoid");
/// # Ok::<(), geoheight::ElevationError>(())
/// ```
#[derive(Debug)]
pub struct ElevationManager {
    config: ElevationConfig,
    geoid: Arc<dyn GeoidModel>,
    databases: RwLock<Vec<Arc<dyn ElevationDatabase>>>,
    options: RwLock<FallbackOptions>,
    enabled: AtomicBool,
    /// Set once `initialize` has loaded the configured sources.
    initialized: Mutex<bool>,
}

impl Default for ElevationManager {
    fn default() -> Self {
        Self::from_config(ElevationConfig::default())
    }
}

impl ElevationManager {
    /// Create a manager with no databases and an identity geoid.
    pub fn from_config(config: ElevationConfig) -> Self {
        Self::new(config, Arc::new(IdentityGeoid))
    }

    /// Create a manager with no databases.
    ///
    /// The geoid is used for fallbacks and handed to every database the
    /// manager opens.
    pub fn new(config: ElevationConfig, geoid: Arc<dyn GeoidModel>) -> Self {
        let options = FallbackOptions {
            default_height_above_ellipsoid: config.default_height_above_ellipsoid,
            elevation_offset: config.elevation_offset,
            use_geoid_if_null: config.use_geoid_if_null,
        };
        Self {
            enabled: AtomicBool::new(config.enabled),
            config,
            geoid,
            databases: RwLock::new(Vec::new()),
            options: RwLock::new(options),
            initialized: Mutex::new(false),
        }
    }

    /// Load the configured sources once.
    ///
    /// Concurrent and repeated calls are safe; only the first call after
    /// construction or [`shutdown`](Self::shutdown) loads anything. Returns
    /// the number of databases added by this call.
    pub fn initialize(&self, registry: &DatabaseRegistry) -> usize {
        let mut initialized = self.initialized.lock();
        if *initialized {
            return 0;
        }
        let added = self.load_search_paths(registry);
        *initialized = true;
        info!(databases = self.database_count(), "elevation manager initialized");
        added
    }

    /// Close every database. The manager can be initialized again.
    pub fn shutdown(&self) {
        let mut initialized = self.initialized.lock();
        let databases = std::mem::take(&mut *self.databases.write());
        for database in &databases {
            database.flush_cache();
        }
        *initialized = false;
        info!(databases = databases.len(), "elevation manager shut down");
    }

    /// Open every configured source through `registry`.
    ///
    /// Explicit database entries come first, in order, followed by the
    /// search paths and the paths listed in `GEOHEIGHT_ELEVATION_PATH`. A
    /// search path that cannot be opened directly has each of its immediate
    /// subdirectories tried instead. Failures are logged and skipped.
    /// Returns the number of databases added.
    pub fn load_search_paths(&self, registry: &DatabaseRegistry) -> usize {
        let mut added = 0;

        for database in self.config.databases.iter().filter(|d| d.enabled) {
            let settings = self
                .config
                .database_settings_for(Some(database), Arc::clone(&self.geoid));
            match registry.open(&database.connection, &settings) {
                Ok(opened) => {
                    self.add_database(opened);
                    added += 1;
                }
                Err(err) => warn!(
                    connection = %database.connection.display(),
                    error = %err,
                    "skipping elevation database"
                ),
            }
        }

        for path in self.config.all_search_paths() {
            added += self.load_search_path(registry, &path);
        }
        added
    }

    fn load_search_path(&self, registry: &DatabaseRegistry, path: &Path) -> usize {
        let settings = self
            .config
            .database_settings_for(None, Arc::clone(&self.geoid));

        let err = match registry.open(path, &settings) {
            Ok(database) => {
                self.add_database(database);
                return 1;
            }
            Err(err) => err,
        };

        let subdirs = match subdirectories(path) {
            Ok(subdirs) => subdirs,
            Err(_) => {
                warn!(path = %path.display(), error = %err, "skipping elevation search path");
                return 0;
            }
        };

        let mut added = 0;
        for subdir in subdirs {
            match registry.open(&subdir, &settings) {
                Ok(database) => {
                    self.add_database(database);
                    added += 1;
                }
                Err(err) => debug!(path = %subdir.display(), error = %err, "no elevation source"),
            }
        }
        if added == 0 {
            warn!(path = %path.display(), error = %err, "no elevation sources under search path");
        }
        added
    }

    /// Append a database at the lowest priority.
    pub fn add_database(&self, database: Arc<dyn ElevationDatabase>) {
        info!(connection = %database.connection().display(), "registered elevation database");
        self.databases.write().push(database);
    }

    /// Number of registered databases.
    pub fn database_count(&self) -> usize {
        self.databases.read().len()
    }

    /// The database at `index` in priority order.
    pub fn database(&self, index: usize) -> Option<Arc<dyn ElevationDatabase>> {
        self.databases.read().get(index).cloned()
    }

    /// Snapshot of the database list, so no lock is held during I/O.
    fn snapshot(&self) -> Vec<Arc<dyn ElevationDatabase>> {
        self.databases.read().clone()
    }

    /// Height above the ellipsoid at `point`, NaN if unavailable.
    pub fn height_above_ellipsoid(&self, point: &GeoPoint) -> f64 {
        if !self.is_enabled() || point.has_nans() {
            return f64::NAN;
        }
        let options = *self.options.read();
        let height = self
            .snapshot()
            .iter()
            .map(|database| database.height_above_ellipsoid(point))
            .find(|height| !height.is_nan())
            .unwrap_or_else(|| {
                record_fallback("ellipsoid");
                match options.default_height_above_ellipsoid {
                    Some(default) => default,
                    None if options.use_geoid_if_null => self.geoid.offset_from_ellipsoid(point),
                    None => f64::NAN,
                }
            });
        options.apply_offset(height)
    }

    /// Height above mean sea level at `point`.
    ///
    /// When no database answers this is sea level, corrected by the default
    /// height above the ellipsoid where the geoid is known. NaN only when
    /// the manager is disabled or the point has NaN coordinates.
    pub fn height_above_msl(&self, point: &GeoPoint) -> f64 {
        if !self.is_enabled() || point.has_nans() {
            return f64::NAN;
        }
        let options = *self.options.read();
        let height = self
            .snapshot()
            .iter()
            .map(|database| database.height_above_msl(point))
            .find(|height| !height.is_nan())
            .unwrap_or_else(|| {
                record_fallback("msl");
                // Sea level, corrected by the default height when the geoid is known
                let offset = self.geoid.offset_from_ellipsoid(point);
                match options.default_height_above_ellipsoid {
                    Some(default) if !offset.is_nan() => default - offset,
                    _ => 0.0,
                }
            });
        options.apply_offset(height)
    }

    /// Accuracy from the first database with valid figures at `point`.
    pub fn accuracy_info(&self, point: &GeoPoint) -> Option<AccuracyInfo> {
        if !self.is_enabled() {
            return None;
        }
        self.snapshot()
            .iter()
            .find_map(|database| database.accuracy_info(point).filter(AccuracyInfo::is_valid))
    }

    /// Whether any database claims coverage of `point`.
    pub fn point_has_coverage(&self, point: &GeoPoint) -> bool {
        self.is_enabled()
            && self
                .snapshot()
                .iter()
                .any(|database| database.point_has_coverage(point))
    }

    /// Every known cell file intersecting `rect`, across all databases.
    pub fn cells_for_bounds(&self, rect: &GeoRect) -> Vec<PathBuf> {
        if !self.is_enabled() {
            return Vec::new();
        }
        self.snapshot()
            .iter()
            .flat_map(|database| database.cells_for_bounds(rect))
            .collect()
    }

    /// Total number of open cells across all databases.
    pub fn open_cell_count(&self) -> usize {
        self.snapshot()
            .iter()
            .map(|database| database.open_cell_count())
            .sum()
    }

    /// Close every open cell in every database.
    pub fn flush_caches(&self) {
        for database in self.snapshot() {
            database.flush_cache();
        }
    }

    pub fn geoid(&self) -> &Arc<dyn GeoidModel> {
        &self.geoid
    }

    pub fn default_height_above_ellipsoid(&self) -> Option<f64> {
        self.options.read().default_height_above_ellipsoid
    }

    pub fn set_default_height_above_ellipsoid(&self, height: Option<f64>) {
        self.options.write().default_height_above_ellipsoid = height;
    }

    pub fn elevation_offset(&self) -> Option<f64> {
        self.options.read().elevation_offset
    }

    pub fn set_elevation_offset(&self, offset: Option<f64>) {
        self.options.write().elevation_offset = offset;
    }

    pub fn use_geoid_if_null(&self) -> bool {
        self.options.read().use_geoid_if_null
    }

    pub fn set_use_geoid_if_null(&self, enabled: bool) {
        self.options.write().use_geoid_if_null = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

fn record_fallback(query: &'static str) {
    metrics::counter!(metric_defs::MANAGER_FALLBACKS.name, "query" => query).increment(1);
}

/// Immediate subdirectories of `path`, sorted.
fn subdirectories(path: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let path = entry?.path();
        if path.is_dir() {
            subdirs.push(path);
        }
    }
    subdirs.sort();
    Ok(subdirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLimits;
    use crate::cell::CellOpener;
    use crate::cell_db::GridCellDatabase;
    use crate::config::DatabaseConfig;
    use crate::database::DatabaseSettings;
    use crate::geoid::ConstantGeoid;
    use crate::image_db::tests::FakeOpener;
    use crate::registry::GridCellFactory;
    use approx::assert_relative_eq;
    use std::sync::atomic::AtomicUsize;

    /// Answers every query with the same height and counts queries.
    #[derive(Debug)]
    struct ConstantDatabase {
        connection: PathBuf,
        settings: DatabaseSettings,
        height: f64,
        queries: AtomicUsize,
    }

    impl ConstantDatabase {
        fn new(name: &str, height: f64) -> Arc<Self> {
            Self::with_accuracy(name, height, None)
        }

        fn with_accuracy(name: &str, height: f64, accuracy: Option<(f64, f64)>) -> Arc<Self> {
            Arc::new(Self {
                connection: PathBuf::from(name),
                settings: DatabaseSettings {
                    absolute_accuracy: accuracy,
                    ..DatabaseSettings::default()
                },
                height,
                queries: AtomicUsize::new(0),
            })
        }

        fn queries(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    impl ElevationDatabase for ConstantDatabase {
        fn connection(&self) -> &Path {
            &self.connection
        }

        fn settings(&self) -> &DatabaseSettings {
            &self.settings
        }

        fn height_above_msl(&self, _point: &GeoPoint) -> f64 {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.height
        }

        fn point_has_coverage(&self, _point: &GeoPoint) -> bool {
            !self.height.is_nan()
        }

        fn cells_for_bounds(&self, _rect: &GeoRect) -> Vec<PathBuf> {
            vec![self.connection.clone()]
        }

        fn open_cell_count(&self) -> usize {
            0
        }

        fn flush_cache(&self) {}
    }

    fn manager_with(databases: &[Arc<ConstantDatabase>]) -> ElevationManager {
        let manager = ElevationManager::new(ElevationConfig::default(), Arc::new(ConstantGeoid(30.0)));
        for database in databases {
            manager.add_database(database.clone());
        }
        manager
    }

    const P: GeoPoint = GeoPoint::new(34.05, -118.25);

    #[test]
    fn test_first_non_nan_database_wins() {
        let a = ConstantDatabase::new("a", f64::NAN);
        let b = ConstantDatabase::new("b", 100.0);
        let c = ConstantDatabase::new("c", 200.0);
        let manager = manager_with(&[a.clone(), b.clone(), c.clone()]);

        assert_eq!(manager.height_above_msl(&P), 100.0);
        assert_eq!((a.queries(), b.queries(), c.queries()), (1, 1, 0));

        // Database heights go through the database geoid (identity here)
        assert_eq!(manager.height_above_ellipsoid(&P), 100.0);
        assert_eq!(c.queries(), 0);
    }

    #[test]
    fn test_offset_is_added() {
        let manager = manager_with(&[ConstantDatabase::new("b", 100.0)]);
        manager.set_elevation_offset(Some(5.0));
        assert_eq!(manager.height_above_ellipsoid(&P), 105.0);
        assert_eq!(manager.height_above_msl(&P), 105.0);
    }

    #[test]
    fn test_default_height_beats_geoid() {
        let manager = manager_with(&[ConstantDatabase::new("a", f64::NAN)]);
        manager.set_default_height_above_ellipsoid(Some(250.0));
        manager.set_use_geoid_if_null(true);
        assert_eq!(manager.height_above_ellipsoid(&P), 250.0);

        manager.set_elevation_offset(Some(-10.0));
        assert_eq!(manager.height_above_ellipsoid(&P), 240.0);
    }

    #[test]
    fn test_geoid_and_nan_fallbacks() {
        let manager = manager_with(&[]);
        assert!(manager.height_above_ellipsoid(&P).is_nan());
        // Mean sea level needs no configuration
        assert_eq!(manager.height_above_msl(&P), 0.0);

        manager.set_elevation_offset(Some(5.0));
        assert!(manager.height_above_ellipsoid(&P).is_nan(), "bias never applies to NaN");
        assert_eq!(manager.height_above_msl(&P), 5.0);

        manager.set_use_geoid_if_null(true);
        assert_eq!(manager.height_above_ellipsoid(&P), 35.0);
        assert_eq!(manager.height_above_msl(&P), 5.0);
    }

    #[test]
    fn test_msl_fallback_removes_geoid() {
        let manager = manager_with(&[]);
        manager.set_default_height_above_ellipsoid(Some(250.0));
        assert_eq!(manager.height_above_msl(&P), 220.0);

        let manager = ElevationManager::new(ElevationConfig::default(), Arc::new(ConstantGeoid(f64::NAN)));
        manager.set_default_height_above_ellipsoid(Some(250.0));
        assert_eq!(manager.height_above_msl(&P), 0.0);
        manager.set_elevation_offset(Some(2.0));
        assert_eq!(manager.height_above_msl(&P), 2.0);
    }

    #[test]
    fn test_nan_point_has_no_height() {
        let a = ConstantDatabase::new("a", 100.0);
        let manager = manager_with(&[a.clone()]);
        manager.set_default_height_above_ellipsoid(Some(250.0));

        let point = GeoPoint::new(f64::NAN, -118.25);
        assert!(manager.height_above_ellipsoid(&point).is_nan());
        assert!(manager.height_above_msl(&point).is_nan());
        assert_eq!(a.queries(), 0);
    }

    #[test]
    fn test_disabled_manager_touches_nothing() {
        let a = ConstantDatabase::with_accuracy("a", 100.0, Some((5.0, 5.0)));
        let manager = manager_with(&[a.clone()]);
        manager.set_default_height_above_ellipsoid(Some(250.0));
        manager.set_enabled(false);

        assert!(manager.height_above_ellipsoid(&P).is_nan());
        assert!(manager.height_above_msl(&P).is_nan());
        assert!(manager.accuracy_info(&P).is_none());
        assert!(!manager.point_has_coverage(&P));
        assert_eq!(a.queries(), 0);

        manager.set_enabled(true);
        assert_eq!(manager.height_above_msl(&P), 100.0);
    }

    #[test]
    fn test_accuracy_from_first_valid_database() {
        let a = ConstantDatabase::new("a", 100.0);
        let b = ConstantDatabase::with_accuracy("b", f64::NAN, Some((1.0, 1.0)));
        let c = ConstantDatabase::with_accuracy("c", 100.0, Some((10.0, 6.0)));
        let d = ConstantDatabase::with_accuracy("d", 100.0, Some((99.0, 99.0)));
        let manager = manager_with(&[a, b, c, d]);

        let info = manager.accuracy_info(&P).expect("accuracy");
        assert_eq!(info.source, "c");
        assert_eq!((info.absolute_ce90, info.absolute_le90), (10.0, 6.0));
    }

    #[test]
    fn test_end_to_end_single_cell() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("USGS_13_n35w119.tif"), b"").expect("write");
        let opener = Arc::new(FakeOpener::default().with_cell(
            "USGS_13_n35w119.tif",
            GeoRect::new(34.0, 35.0, -119.0, -118.0),
            120.3,
        ));
        let database = GridCellDatabase::open(dir.path(), DatabaseSettings::default(), opener)
            .expect("open");

        let manager = ElevationManager::default();
        manager.add_database(Arc::new(database));

        assert_relative_eq!(manager.height_above_ellipsoid(&P), 120.3);
        assert!(manager.height_above_ellipsoid(&P.offset(0.0, 10.0)).is_nan());
        assert_eq!(manager.open_cell_count(), 1);

        manager.flush_caches();
        assert_eq!(manager.open_cell_count(), 0);
    }

    fn grid_registry(opener: Arc<FakeOpener>) -> DatabaseRegistry {
        let opener: Arc<dyn CellOpener> = opener;
        let mut registry = DatabaseRegistry::new();
        registry.register(Arc::new(GridCellFactory::new(opener)));
        registry
    }

    #[test]
    fn test_search_path_tries_subdirectories() {
        let root = tempfile::tempdir().expect("tempdir");
        for (sub, name) in [("a", Some("n48w123.tif")), ("b", Some("n10w010.tif")), ("c", None)] {
            std::fs::create_dir(root.path().join(sub)).expect("mkdir");
            if let Some(name) = name {
                std::fs::write(root.path().join(sub).join(name), b"").expect("write");
            }
        }

        let config = ElevationConfig {
            search_paths: vec![root.path().to_path_buf(), root.path().join("missing")],
            ..ElevationConfig::default()
        };
        let manager = ElevationManager::from_config(config);
        let added = manager.load_search_paths(&grid_registry(Arc::new(FakeOpener::default())));

        assert_eq!(added, 2);
        assert_eq!(manager.database(0).expect("db").connection(), root.path().join("a"));
        assert!(manager.point_has_coverage(&GeoPoint::new(9.5, -9.5)));
    }

    #[test]
    fn test_initialize_is_idempotent_and_restartable() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("n48w123.tif"), b"").expect("write");

        let mut database = DatabaseConfig::new(dir.path());
        database.max_open_cells = Some(3);
        let disabled = DatabaseConfig {
            enabled: false,
            ..DatabaseConfig::new(dir.path())
        };
        let config = ElevationConfig {
            databases: vec![database, disabled],
            ..ElevationConfig::default()
        };
        let manager = Arc::new(ElevationManager::from_config(config));
        let registry = grid_registry(Arc::new(FakeOpener::default()));

        let added: usize = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| manager.initialize(&registry)))
                .collect();
            workers.into_iter().map(|w| w.join().expect("join")).sum()
        });
        assert_eq!(added, 1);
        assert_eq!(manager.database_count(), 1);
        let limits = manager.database(0).expect("db").settings().limits;
        assert_eq!(limits, CacheLimits::new(5, 3));

        manager.shutdown();
        assert_eq!(manager.database_count(), 0);
        assert_eq!(manager.initialize(&registry), 1);
    }

    #[test]
    fn test_cells_for_bounds_spans_databases() {
        let manager = manager_with(&[ConstantDatabase::new("a", 1.0), ConstantDatabase::new("b", 2.0)]);
        let cells = manager.cells_for_bounds(&GeoRect::new(0.0, 1.0, 0.0, 1.0));
        assert_eq!(cells, vec![PathBuf::from("a"), PathBuf::from("b")]);
    }
}

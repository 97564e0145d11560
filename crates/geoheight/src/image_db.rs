//! File-backed elevation database with a lazily-resolved catalog.
//!
//! Opening the database only records candidate files; their footprints are
//! discovered the first time a query needs them. A file that fails to open
//! is dropped from the catalog for good.

use crate::cache::CellCache;
use crate::cell::{open_cell, CellOpener, ElevationCell};
use crate::database::{DatabaseSettings, ElevationDatabase};
use crate::enumerator::FileEnumerator;
use crate::geo::{GeoPoint, GeoRect};
use crate::{ElevationError, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Identifier of a cell promoted into a database's cache.
///
/// Assigned from a per-database counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(pub u64);

/// A candidate cell file known to the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// Path of the backing file.
    pub path: PathBuf,
    /// Footprint, known once the file has been opened.
    pub rect: Option<GeoRect>,
    /// Cache entry holding the open cell, if any.
    pub loaded: Option<CellId>,
}

impl FileEntry {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            rect: None,
            loaded: None,
        }
    }
}

/// An elevation database over an arbitrary set of raster files.
///
/// Lookups first scan the open cells; on a miss the catalog is walked in
/// insertion order and the first file whose footprint and precise coverage
/// include the point is opened and cached. There is no best-fit selection
/// among overlapping files.
#[derive(Debug)]
pub struct ImageElevationDatabase {
    connection: PathBuf,
    settings: DatabaseSettings,
    opener: Arc<dyn CellOpener>,
    /// Candidate files in discovery order.
    catalog: Mutex<Vec<FileEntry>>,
    cache: CellCache<CellId>,
    next_id: AtomicU64,
}

impl ImageElevationDatabase {
    /// Open a database rooted at `connection`.
    ///
    /// Every file the enumerator reports and the opener accepts becomes a
    /// catalog entry; nothing is opened yet. Fails if no entry was found.
    pub fn open(
        connection: impl Into<PathBuf>,
        settings: DatabaseSettings,
        opener: Arc<dyn CellOpener>,
        enumerator: &dyn FileEnumerator,
    ) -> Result<Self> {
        let connection = connection.into();
        let database = Self {
            cache: CellCache::new(connection.display().to_string(), settings.limits),
            connection,
            settings,
            opener,
            catalog: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        };

        enumerator.enumerate(&database.connection, &|path| {
            database.add_file(path);
        })?;

        let entries = database.catalog_len();
        if entries == 0 {
            return Err(ElevationError::EmptyCatalog(database.connection));
        }
        info!(
            connection = %database.connection.display(),
            entries,
            "opened image elevation database"
        );
        Ok(database)
    }

    /// Add a candidate file to the catalog.
    ///
    /// Returns `false` if the opener does not accept the file or it is
    /// already cataloged.
    pub fn add_file(&self, path: PathBuf) -> bool {
        if !self.opener.accepts(&path) {
            return false;
        }
        let mut catalog = self.catalog.lock();
        if catalog.iter().any(|entry| entry.path == path) {
            return false;
        }
        catalog.push(FileEntry::new(path));
        true
    }

    /// Number of cataloged files.
    pub fn catalog_len(&self) -> usize {
        self.catalog.lock().len()
    }

    /// Snapshot of the catalog.
    pub fn catalog(&self) -> Vec<FileEntry> {
        self.catalog.lock().clone()
    }

    /// Find or open the cell covering `point`.
    fn cell_for(&self, point: &GeoPoint) -> Option<Arc<dyn ElevationCell>> {
        if let Some(cell) = self.cache.lookup(point) {
            return Some(cell);
        }
        self.load_covering_cell(point)
    }

    /// Walk the catalog for a file covering `point` and promote it.
    ///
    /// The catalog lock is held for the whole walk so a file is never opened
    /// twice concurrently; the cache lock is only taken to insert.
    fn load_covering_cell(&self, point: &GeoPoint) -> Option<Arc<dyn ElevationCell>> {
        let mut catalog = self.catalog.lock();

        // Another thread may have promoted a covering cell while we waited
        if let Some(cell) = self.cache.lookup(point) {
            return Some(cell);
        }

        let mut index = 0;
        while index < catalog.len() {
            let entry = &mut catalog[index];
            if entry.loaded.is_some() {
                index += 1;
                continue;
            }

            let mut opened = None;
            let rect = match entry.rect {
                Some(rect) => rect,
                None => match self.open_cell(&entry.path) {
                    Some(cell) => {
                        let rect = cell.bounding_rect();
                        entry.rect = Some(rect);
                        opened = Some(cell);
                        rect
                    }
                    None => {
                        catalog.remove(index);
                        continue;
                    }
                },
            };

            if !rect.contains_point(point) {
                index += 1;
                continue;
            }

            let cell = match opened {
                Some(cell) => cell,
                None => match self.open_cell(&entry.path) {
                    Some(cell) => cell,
                    None => {
                        catalog.remove(index);
                        continue;
                    }
                },
            };

            if cell.point_has_coverage(point) {
                let id = CellId(self.next_id.fetch_add(1, Ordering::Relaxed));
                entry.loaded = Some(id);
                let evicted = self.cache.insert(id, Arc::clone(&cell));
                Self::mark_unloaded(&mut catalog, &evicted);
                return Some(cell);
            }
            index += 1;
        }

        None
    }

    fn open_cell(&self, path: &Path) -> Option<Arc<dyn ElevationCell>> {
        open_cell(self.opener.as_ref(), path, self.cache.name())
    }

    fn mark_unloaded(catalog: &mut [FileEntry], evicted: &[CellId]) {
        if evicted.is_empty() {
            return;
        }
        for entry in catalog.iter_mut() {
            if entry.loaded.is_some_and(|id| evicted.contains(&id)) {
                entry.loaded = None;
            }
        }
    }
}

impl ElevationDatabase for ImageElevationDatabase {
    fn connection(&self) -> &Path {
        &self.connection
    }

    fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    fn height_above_msl(&self, point: &GeoPoint) -> f64 {
        match self.cell_for(point) {
            Some(cell) => cell.height_above_msl(point),
            None => f64::NAN,
        }
    }

    fn point_has_coverage(&self, point: &GeoPoint) -> bool {
        self.catalog
            .lock()
            .iter()
            .any(|entry| entry.rect.is_some_and(|rect| rect.contains_point(point)))
    }

    fn cells_for_bounds(&self, rect: &GeoRect) -> Vec<PathBuf> {
        let mut catalog = self.catalog.lock();
        let mut cells = Vec::new();
        let mut index = 0;
        while index < catalog.len() {
            if catalog[index].rect.is_none() {
                match self.open_cell(&catalog[index].path) {
                    Some(cell) => catalog[index].rect = Some(cell.bounding_rect()),
                    None => {
                        catalog.remove(index);
                        continue;
                    }
                }
            }
            let entry = &catalog[index];
            if entry.rect.is_some_and(|r| r.intersects(rect)) {
                cells.push(entry.path.clone());
            }
            index += 1;
        }
        cells
    }

    fn open_cell_count(&self) -> usize {
        self.cache.len()
    }

    fn flush_cache(&self) {
        let mut catalog = self.catalog.lock();
        let evicted = self.cache.clear();
        Self::mark_unloaded(&mut catalog, &evicted);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::CacheLimits;
    use crate::enumerator::FileVisitor;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    /// A constant-height cell over a rectangle, optionally with a hole.
    #[derive(Debug)]
    pub(crate) struct FlatCell {
        pub rect: GeoRect,
        pub height: f64,
        pub hole: Option<GeoRect>,
    }

    impl ElevationCell for FlatCell {
        fn bounding_rect(&self) -> GeoRect {
            self.rect
        }

        fn point_has_coverage(&self, point: &GeoPoint) -> bool {
            self.rect.contains_point(point) && !self.hole.is_some_and(|h| h.contains_point(point))
        }

        fn height_above_msl(&self, point: &GeoPoint) -> f64 {
            if self.point_has_coverage(point) {
                self.height
            } else {
                f64::NAN
            }
        }
    }

    /// Opens in-memory cells by file name, counting attempts per name.
    #[derive(Debug, Default)]
    pub(crate) struct FakeOpener {
        cells: Mutex<HashMap<String, (GeoRect, f64, Option<GeoRect>)>>,
        attempts: Mutex<HashMap<String, usize>>,
        pub opens: AtomicUsize,
    }

    impl FakeOpener {
        pub(crate) fn with_cell(self, name: &str, rect: GeoRect, height: f64) -> Self {
            self.cells.lock().insert(name.to_string(), (rect, height, None));
            self
        }

        pub(crate) fn with_holed_cell(self, name: &str, rect: GeoRect, hole: GeoRect, height: f64) -> Self {
            self.cells.lock().insert(name.to_string(), (rect, height, Some(hole)));
            self
        }

        pub(crate) fn delete(&self, name: &str) {
            self.cells.lock().remove(name);
        }

        pub(crate) fn attempts(&self, name: &str) -> usize {
            self.attempts.lock().get(name).copied().unwrap_or(0)
        }
    }

    impl CellOpener for FakeOpener {
        fn open(&self, path: &Path) -> Result<Arc<dyn ElevationCell>> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            *self.attempts.lock().entry(name.clone()).or_default() += 1;
            let (rect, height, hole) = self
                .cells
                .lock()
                .get(&name)
                .copied()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, name.clone()))?;
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FlatCell { rect, height, hole }))
        }

        fn accepts(&self, path: &Path) -> bool {
            path.extension().is_some_and(|ext| ext == "tif")
        }
    }

    /// Reports a fixed list of file names under the root.
    #[derive(Debug)]
    pub(crate) struct ListEnumerator(pub Vec<&'static str>);

    impl FileEnumerator for ListEnumerator {
        fn enumerate(&self, root: &Path, visit: FileVisitor<'_>) -> Result<()> {
            for name in &self.0 {
                visit(root.join(name));
            }
            Ok(())
        }
    }

    fn open_db(opener: Arc<FakeOpener>, names: Vec<&'static str>, limits: CacheLimits) -> ImageElevationDatabase {
        let settings = DatabaseSettings {
            limits,
            ..DatabaseSettings::default()
        };
        ImageElevationDatabase::open("/elev", settings, opener, &ListEnumerator(names))
            .expect("open")
    }

    fn unit_rect(lat: f64, lon: f64) -> GeoRect {
        GeoRect::new(lat, lat + 1.0, lon, lon + 1.0)
    }

    #[test]
    fn test_open_filters_and_rejects_empty() {
        let opener = Arc::new(FakeOpener::default());
        let db = open_db(opener.clone(), vec!["a.tif", "readme.txt", "b.tif", "a.tif"], CacheLimits::default());
        assert_eq!(db.catalog_len(), 2);
        assert_eq!(opener.opens.load(Ordering::SeqCst), 0);

        let result = ImageElevationDatabase::open(
            "/empty",
            DatabaseSettings::default(),
            opener,
            &ListEnumerator(vec!["notes.txt"]),
        );
        assert!(matches!(result, Err(ElevationError::EmptyCatalog(_))));
    }

    #[test]
    fn test_lazy_open_and_cache_hit() {
        let opener = Arc::new(
            FakeOpener::default()
                .with_cell("a.tif", unit_rect(10.0, 10.0), 100.0)
                .with_cell("b.tif", unit_rect(20.0, 20.0), 200.0),
        );
        let db = open_db(opener.clone(), vec!["a.tif", "b.tif"], CacheLimits::default());

        assert_eq!(db.height_above_msl(&GeoPoint::new(20.5, 20.5)), 200.0);
        // a.tif is opened only to learn its footprint
        assert_eq!(opener.attempts("a.tif"), 1);
        assert_eq!(opener.attempts("b.tif"), 1);
        assert_eq!(db.open_cell_count(), 1);

        let opens = opener.opens.load(Ordering::SeqCst);
        assert_eq!(db.height_above_msl(&GeoPoint::new(20.25, 20.75)), 200.0);
        assert_eq!(opener.opens.load(Ordering::SeqCst), opens);

        let catalog = db.catalog();
        assert_eq!(catalog[0].rect, Some(unit_rect(10.0, 10.0)));
        assert!(catalog[0].loaded.is_none());
        assert!(catalog[1].loaded.is_some());
    }

    #[test]
    fn test_first_match_wins_for_overlaps() {
        let opener = Arc::new(
            FakeOpener::default()
                .with_cell("coarse.tif", GeoRect::new(0.0, 10.0, 0.0, 10.0), 1.0)
                .with_cell("fine.tif", unit_rect(5.0, 5.0), 2.0),
        );
        let db = open_db(opener, vec!["coarse.tif", "fine.tif"], CacheLimits::default());
        assert_eq!(db.height_above_msl(&GeoPoint::new(5.5, 5.5)), 1.0);
    }

    #[test]
    fn test_precise_coverage_skips_holes() {
        let opener = Arc::new(
            FakeOpener::default()
                .with_holed_cell("holed.tif", unit_rect(0.0, 0.0), GeoRect::new(0.4, 0.6, 0.4, 0.6), 1.0)
                .with_cell("patch.tif", GeoRect::new(0.3, 0.7, 0.3, 0.7), 2.0),
        );
        let db = open_db(opener, vec!["holed.tif", "patch.tif"], CacheLimits::default());

        // The rect test passes for holed.tif but the precise test does not
        assert_eq!(db.height_above_msl(&GeoPoint::new(0.5, 0.5)), 2.0);
        assert_eq!(db.height_above_msl(&GeoPoint::new(0.1, 0.1)), 1.0);
        assert!(db.point_has_coverage(&GeoPoint::new(0.5, 0.5)));
    }

    #[test]
    fn test_bad_entry_removed_once() {
        let opener = Arc::new(
            FakeOpener::default()
                .with_cell("gone.tif", unit_rect(0.0, 0.0), 1.0)
                .with_cell("ok.tif", unit_rect(5.0, 5.0), 5.0),
        );
        opener.delete("gone.tif");
        let db = open_db(opener.clone(), vec!["gone.tif", "ok.tif"], CacheLimits::default());

        assert!(db.height_above_msl(&GeoPoint::new(0.5, 0.5)).is_nan());
        assert_eq!(opener.attempts("gone.tif"), 1);
        assert_eq!(db.catalog_len(), 1);

        assert!(db.height_above_msl(&GeoPoint::new(0.5, 0.5)).is_nan());
        assert_eq!(db.height_above_msl(&GeoPoint::new(5.5, 5.5)), 5.0);
        assert_eq!(opener.attempts("gone.tif"), 1);
    }

    /// Counts warnings raised while opening cells.
    struct CellWarnings(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CellWarnings {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            let metadata = event.metadata();
            if *metadata.level() == tracing::Level::WARN && metadata.target() == "geoheight::cell" {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_bad_entry_warns_exactly_once() {
        use tracing_subscriber::layer::SubscriberExt;

        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(CellWarnings(Arc::clone(&warnings)));

        tracing::subscriber::with_default(subscriber, || {
            let opener = Arc::new(
                FakeOpener::default()
                    .with_cell("gone.tif", unit_rect(0.0, 0.0), 1.0)
                    .with_cell("ok.tif", unit_rect(5.0, 5.0), 5.0),
            );
            opener.delete("gone.tif");
            let db = open_db(opener, vec!["gone.tif", "ok.tif"], CacheLimits::default());

            assert!(db.height_above_msl(&GeoPoint::new(0.5, 0.5)).is_nan());
            assert_eq!(warnings.load(Ordering::SeqCst), 1);

            for _ in 0..3 {
                assert!(db.height_above_msl(&GeoPoint::new(0.5, 0.5)).is_nan());
                assert_eq!(db.height_above_msl(&GeoPoint::new(5.5, 5.5)), 5.0);
            }
            assert!(db.cells_for_bounds(&unit_rect(0.0, 0.0)).is_empty());
            assert_eq!(warnings.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn test_eviction_clears_loaded_and_reopens() {
        let opener = Arc::new(
            FakeOpener::default()
                .with_cell("a.tif", unit_rect(0.0, 0.0), 1.0)
                .with_cell("b.tif", unit_rect(1.0, 0.0), 2.0)
                .with_cell("c.tif", unit_rect(2.0, 0.0), 3.0),
        );
        let limits = CacheLimits::new(1, 2);
        let db = open_db(opener.clone(), vec!["a.tif", "b.tif", "c.tif"], limits);

        for lat in [0.5, 1.5, 2.5] {
            db.height_above_msl(&GeoPoint::new(lat, 0.5));
            assert!(db.open_cell_count() <= limits.max_open_cells);
        }
        assert_eq!(db.open_cell_count(), 1);
        let loaded: Vec<_> = db.catalog().iter().map(|e| e.loaded.is_some()).collect();
        assert_eq!(loaded, vec![false, false, true]);

        let before = opener.attempts("a.tif");
        assert_eq!(db.height_above_msl(&GeoPoint::new(0.5, 0.5)), 1.0);
        assert_eq!(opener.attempts("a.tif"), before + 1);
    }

    #[test]
    fn test_file_deleted_after_eviction_is_dropped_once() {
        let opener = Arc::new(
            FakeOpener::default()
                .with_cell("a.tif", unit_rect(0.0, 0.0), 1.0)
                .with_cell("b.tif", unit_rect(1.0, 0.0), 2.0),
        );
        let db = open_db(opener.clone(), vec!["a.tif", "b.tif"], CacheLimits::new(1, 1));

        assert_eq!(db.height_above_msl(&GeoPoint::new(0.5, 0.5)), 1.0);
        assert_eq!(db.height_above_msl(&GeoPoint::new(1.5, 0.5)), 2.0);
        assert!(db.catalog()[0].loaded.is_none());

        opener.delete("a.tif");
        let before = opener.attempts("a.tif");
        assert!(db.height_above_msl(&GeoPoint::new(0.5, 0.5)).is_nan());
        assert!(db.height_above_msl(&GeoPoint::new(0.5, 0.5)).is_nan());
        assert_eq!(opener.attempts("a.tif"), before + 1);
        assert_eq!(db.catalog_len(), 1);
    }

    #[test]
    fn test_cells_for_bounds_discovers_rects() {
        let opener = Arc::new(
            FakeOpener::default()
                .with_cell("a.tif", unit_rect(0.0, 0.0), 1.0)
                .with_cell("b.tif", unit_rect(10.0, 10.0), 2.0),
        );
        let db = open_db(opener, vec!["a.tif", "b.tif"], CacheLimits::default());

        let cells = db.cells_for_bounds(&GeoRect::new(-1.0, 0.5, -1.0, 0.5));
        assert_eq!(cells, vec![PathBuf::from("/elev/a.tif")]);
        assert!(db.point_has_coverage(&GeoPoint::new(10.5, 10.5)));
        assert_eq!(db.open_cell_count(), 0);
    }

    #[test]
    fn test_accuracy_requires_settings_and_coverage() {
        let opener = Arc::new(FakeOpener::default().with_cell("a.tif", unit_rect(0.0, 0.0), 1.0));
        let settings = DatabaseSettings {
            absolute_accuracy: Some((12.0, 8.0)),
            ..DatabaseSettings::default()
        };
        let db = ImageElevationDatabase::open("/elev", settings, opener, &ListEnumerator(vec!["a.tif"]))
            .expect("open");

        let point = GeoPoint::new(0.5, 0.5);
        assert!(db.accuracy_info(&point).is_none(), "footprint not known yet");
        db.height_above_msl(&point);
        let info = db.accuracy_info(&point).expect("accuracy");
        assert_eq!(info.absolute_ce90, 12.0);
        assert_eq!(info.absolute_le90, 8.0);
        assert_eq!(info.source, "/elev");
    }

    #[test]
    fn test_concurrent_queries_open_each_file_once() {
        let opener = Arc::new(
            FakeOpener::default()
                .with_cell("a.tif", unit_rect(0.0, 0.0), 1.0)
                .with_cell("b.tif", unit_rect(0.0, 1.0), 2.0),
        );
        let db = open_db(opener.clone(), vec!["a.tif", "b.tif"], CacheLimits::default());

        std::thread::scope(|scope| {
            for i in 0..8 {
                let db = &db;
                scope.spawn(move || {
                    let lon = if i % 2 == 0 { 0.5 } else { 1.5 };
                    for _ in 0..50 {
                        assert!(!db.height_above_msl(&GeoPoint::new(0.5, lon)).is_nan());
                    }
                });
            }
        });

        assert_eq!(db.open_cell_count(), 2);
        let loaded = db.catalog().iter().filter(|e| e.loaded.is_some()).count();
        assert_eq!(loaded, 2);
    }
}

//! Bounded cache of open elevation cells.
//!
//! Each database owns one [`CellCache`]. Every read and write takes the
//! cache's single mutex for its full (short) duration; no cell is ever opened
//! while the lock is held. Cells are handed out as `Arc` clones so a query
//! can keep using a cell that another thread evicts in the meantime.

use crate::cell::ElevationCell;
use crate::geo::GeoPoint;
use geoheight_metrics::metric_defs;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Default number of cells kept after a flush.
pub const DEFAULT_MIN_OPEN_CELLS: usize = 5;

/// Default number of cells that triggers a flush when exceeded.
pub const DEFAULT_MAX_OPEN_CELLS: usize = 25;

/// Low- and high-water marks for the number of open cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Cells kept after eviction.
    pub min_open_cells: usize,
    /// Cells allowed before eviction kicks in.
    pub max_open_cells: usize,
}

impl CacheLimits {
    /// Create limits, clamping them to `1 <= min <= max`.
    pub fn new(min_open_cells: usize, max_open_cells: usize) -> Self {
        let max_open_cells = max_open_cells.max(1);
        Self {
            min_open_cells: min_open_cells.clamp(1, max_open_cells),
            max_open_cells,
        }
    }
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_OPEN_CELLS, DEFAULT_MAX_OPEN_CELLS)
    }
}

#[derive(Debug)]
struct CacheSlot {
    cell: Arc<dyn ElevationCell>,
    /// Logical time of the last access.
    tick: u64,
}

#[derive(Debug)]
struct CacheState<K> {
    /// Open cells ordered by key; lookups scan this order.
    cells: BTreeMap<K, CacheSlot>,
    /// Keys ordered by last access, oldest first.
    lru: BTreeMap<u64, K>,
    /// Key of the most recent hit or insert.
    last_accessed: Option<K>,
    clock: u64,
}

impl<K: Ord + Copy> CacheState<K> {
    fn new() -> Self {
        Self {
            cells: BTreeMap::new(),
            lru: BTreeMap::new(),
            last_accessed: None,
            clock: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Refresh a key's access time and return its cell.
    fn touch(&mut self, key: K) -> Option<Arc<dyn ElevationCell>> {
        let tick = self.next_tick();
        let slot = self.cells.get_mut(&key)?;
        self.lru.remove(&slot.tick);
        slot.tick = tick;
        self.lru.insert(tick, key);
        self.last_accessed = Some(key);
        Some(Arc::clone(&slot.cell))
    }

    /// First key, scanning from the last accessed key and wrapping around,
    /// whose cell covers `point`.
    fn find_covering(&self, point: &GeoPoint) -> Option<K> {
        let start = self
            .last_accessed
            .or_else(|| self.cells.keys().next().copied())?;

        self.cells
            .range(start..)
            .chain(self.cells.range(..start))
            .find(|(_, slot)| slot.cell.point_has_coverage(point))
            .map(|(key, _)| *key)
    }

    fn evict_oldest(&mut self) -> Option<K> {
        let (_, key) = self.lru.pop_first()?;
        self.cells.remove(&key);
        if self.last_accessed == Some(key) {
            self.last_accessed = None;
        }
        Some(key)
    }

    fn evict_to(&mut self, target: usize) -> Vec<K> {
        let mut evicted = Vec::new();
        while self.cells.len() > target {
            match self.evict_oldest() {
                Some(key) => evicted.push(key),
                None => break,
            }
        }
        evicted
    }
}

/// A bounded, thread-safe map of open cells with strict LRU eviction.
///
/// When an insert pushes the cache above `max_open_cells`, the least
/// recently used cells are dropped until `min_open_cells` remain. Eviction
/// only drops the cache's reference; callers still holding a cell keep it.
#[derive(Debug)]
pub struct CellCache<K> {
    /// Owning database name, used as a metrics label.
    name: String,
    limits: CacheLimits,
    state: Mutex<CacheState<K>>,
}

impl<K: Ord + Copy> CellCache<K> {
    /// Create an empty cache.
    pub fn new(name: impl Into<String>, limits: CacheLimits) -> Self {
        Self {
            name: name.into(),
            limits,
            state: Mutex::new(CacheState::new()),
        }
    }

    /// Name of the owning database.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configured limits.
    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Find an open cell whose precise coverage includes `point`.
    ///
    /// The scan starts at the most recently used cell, since successive
    /// queries tend to be spatially close.
    pub fn lookup(&self, point: &GeoPoint) -> Option<Arc<dyn ElevationCell>> {
        let mut state = self.state.lock();
        let cell = state
            .find_covering(point)
            .and_then(|key| state.touch(key));
        self.record_lookup(cell.is_some());
        cell
    }

    /// Get the cell stored under `key`.
    pub fn get(&self, key: &K) -> Option<Arc<dyn ElevationCell>> {
        let cell = self.state.lock().touch(*key);
        self.record_lookup(cell.is_some());
        cell
    }

    /// Whether a cell is stored under `key`, without refreshing it.
    pub fn contains(&self, key: &K) -> bool {
        self.state.lock().cells.contains_key(key)
    }

    /// Insert a cell, evicting down to the low-water mark if the cache is
    /// now above its maximum.
    ///
    /// Returns the evicted keys so the owner can mark them unloaded.
    pub fn insert(&self, key: K, cell: Arc<dyn ElevationCell>) -> Vec<K> {
        let mut state = self.state.lock();
        let tick = state.next_tick();
        if let Some(previous) = state.cells.insert(key, CacheSlot { cell, tick }) {
            state.lru.remove(&previous.tick);
        }
        state.lru.insert(tick, key);
        state.last_accessed = Some(key);

        let evicted = if state.cells.len() > self.limits.max_open_cells {
            state.evict_to(self.limits.min_open_cells)
        } else {
            Vec::new()
        };
        self.record_size(state.cells.len(), evicted.len());
        evicted
    }

    /// Evict least recently used cells until `min_open_cells` remain.
    pub fn flush_to_min(&self) -> Vec<K> {
        let mut state = self.state.lock();
        let evicted = state.evict_to(self.limits.min_open_cells);
        self.record_size(state.cells.len(), evicted.len());
        evicted
    }

    /// Drop every cell.
    pub fn clear(&self) -> Vec<K> {
        let mut state = self.state.lock();
        let evicted = state.evict_to(0);
        self.record_size(0, evicted.len());
        evicted
    }

    /// Number of open cells.
    pub fn len(&self) -> usize {
        self.state.lock().cells.len()
    }

    /// Whether no cells are open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record_lookup(&self, hit: bool) {
        let metric = if hit {
            &metric_defs::CELL_CACHE_HITS
        } else {
            &metric_defs::CELL_CACHE_MISSES
        };
        metrics::counter!(metric.name, "database" => self.name.clone()).increment(1);
    }

    fn record_size(&self, open: usize, evicted: usize) {
        if evicted > 0 {
            debug!(database = %self.name, evicted, open, "flushed cell cache");
            metrics::counter!(metric_defs::CELL_CACHE_EVICTIONS.name, "database" => self.name.clone())
                .increment(evicted as u64);
        }
        metrics::gauge!(metric_defs::OPEN_CELLS.name, "database" => self.name.clone()).set(open as f64);
    }
}

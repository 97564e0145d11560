//! Metric declarations for the geoheight elevation stack.
//!
//! Every metric the `geoheight` crate emits is declared once here as a
//! [`Metric`] constant, so names and label keys are not retyped at each call
//! site. The crate re-exports [`metrics`]; install any recorder, then call
//! [`describe_metrics`] once at startup.
//!
//! ```rust
//! use geoheight_metrics::{metric_defs, Metric, MetricKind};
//!
//! assert_eq!(metric_defs::CELL_CACHE_HITS.kind, MetricKind::Counter);
//! metrics::counter!(metric_defs::CELL_CACHE_HITS.name, "database" => "/data/dted").increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, Unit};

/// Whether a metric only grows or can go both ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A value that can go up and down.
    Gauge,
}

impl MetricKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// Built with const constructors so declarations live in `const` items:
///
/// ```rust
/// use geoheight_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const TILE_READS: Metric = Metric::counter("geoheight.example.tile_reads")
///     .with_description("Tiles read from disk")
///     .with_unit(Unit::Count)
///     .with_labels(&["database"]);
///
/// assert_eq!(TILE_READS.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// Name passed to the `metrics` macros.
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Option<Unit>,
    /// Label keys attached at every emission.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// A counter with no description, unit or labels.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// A gauge with no description, unit or labels.
    pub const fn gauge(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Register this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
        }
    }
}

/// Every metric emitted by the elevation stack.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels on per-database metrics. The value is the connection path.
    pub const DATABASE_LABELS: &[&str] = &["database"];

    // Cell cache

    pub const CELL_CACHE_HITS: Metric = Metric::counter("geoheight.cache.hits")
        .with_description("Queries answered by an already open cell")
        .with_unit(Unit::Count)
        .with_labels(DATABASE_LABELS);

    pub const CELL_CACHE_MISSES: Metric = Metric::counter("geoheight.cache.misses")
        .with_description("Queries with no open cell covering the point")
        .with_unit(Unit::Count)
        .with_labels(DATABASE_LABELS);

    pub const CELL_CACHE_EVICTIONS: Metric = Metric::counter("geoheight.cache.evictions")
        .with_description("Cells closed to keep the cache within its limits")
        .with_unit(Unit::Count)
        .with_labels(DATABASE_LABELS);

    /// Current number of open cells, updated on insert and flush.
    pub const OPEN_CELLS: Metric = Metric::gauge("geoheight.cache.open_cells")
        .with_description("Cells currently open")
        .with_unit(Unit::Count)
        .with_labels(DATABASE_LABELS);

    // Cell files

    pub const CELL_OPENS: Metric = Metric::counter("geoheight.cell.opens")
        .with_description("Cell files opened")
        .with_unit(Unit::Count)
        .with_labels(DATABASE_LABELS);

    pub const CELL_OPEN_FAILURES: Metric = Metric::counter("geoheight.cell.open_failures")
        .with_description("Cell files that failed to open and were dropped")
        .with_unit(Unit::Count)
        .with_labels(DATABASE_LABELS);

    // Manager

    /// Queries no database could answer. Labelled `ellipsoid` or `msl`.
    pub const MANAGER_FALLBACKS: Metric = Metric::counter("geoheight.manager.fallbacks")
        .with_description("Height queries answered by the fallback policy")
        .with_unit(Unit::Count)
        .with_labels(&["query"]);

    pub const ALL: &[&Metric] = &[
        &CELL_CACHE_HITS,
        &CELL_CACHE_MISSES,
        &CELL_CACHE_EVICTIONS,
        &OPEN_CELLS,
        &CELL_OPENS,
        &CELL_OPEN_FAILURES,
        &MANAGER_FALLBACKS,
    ];
}

/// Describe every metric in [`metric_defs::ALL`].
///
/// Call once after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::CELL_CACHE_HITS.name, "geoheight.cache.hits");
        assert_eq!(metric_defs::CELL_CACHE_HITS.kind, MetricKind::Counter);
        assert_eq!(metric_defs::CELL_CACHE_HITS.unit, Some(Unit::Count));
        assert_eq!(metric_defs::OPEN_CELLS.kind, MetricKind::Gauge);
        assert_eq!(metric_defs::MANAGER_FALLBACKS.labels, &["query"]);
    }

    #[test]
    fn test_all_metrics_are_unique_and_described() {
        assert_eq!(metric_defs::ALL.len(), 7);
        let names: HashSet<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        assert_eq!(names.len(), metric_defs::ALL.len());
        for metric in metric_defs::ALL {
            assert!(metric.name.starts_with("geoheight."), "{}", metric.name);
            assert!(!metric.description.is_empty(), "{} has no description", metric.name);
            assert!(!metric.labels.is_empty(), "{} has no labels", metric.name);
        }
    }

    #[test]
    fn test_per_database_metrics_share_labels() {
        for metric in metric_defs::ALL.iter().filter(|m| m.name.starts_with("geoheight.c")) {
            assert_eq!(metric.labels, metric_defs::DATABASE_LABELS);
        }
    }

    #[test]
    fn test_metric_builder() {
        const TEST_GAUGE: Metric = Metric::gauge("test.gauge")
            .with_description("A test gauge")
            .with_unit(Unit::Bytes)
            .with_labels(&["database"]);

        assert_eq!(TEST_GAUGE.name, "test.gauge");
        assert_eq!(TEST_GAUGE.kind, MetricKind::Gauge);
        assert_eq!(TEST_GAUGE.description, "A test gauge");
        assert_eq!(TEST_GAUGE.unit, Some(Unit::Bytes));
        assert_eq!(TEST_GAUGE.kind.to_string(), "gauge");
    }

    #[test]
    fn test_metric_minimal() {
        const MINIMAL: Metric = Metric::counter("minimal");

        assert_eq!(MINIMAL.description, "");
        assert_eq!(MINIMAL.unit, None);
        assert_eq!(MINIMAL.labels, &[] as &[&str]);
    }

    #[test]
    fn test_describe_without_recorder() {
        // No recorder installed; describing must be a no-op
        describe_metrics();
    }
}

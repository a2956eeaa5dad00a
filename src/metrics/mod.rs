//! Metrics facade: four instrument families behind pluggable backends.
//!
//! Instruments are keyed by `(name, labels)`; requesting the same pair
//! twice returns the same instrument. Counters are integer-only by
//! contract: fractional increments are unrepresentable at this interface.
//!
//! Two backends ship with the crate: the in-memory reference backend
//! ([`MemoryMetrics`]) and a Prometheus exporter ([`PrometheusMetrics`]).
//! Additional backends register through the backend registry.

mod memory;
mod prometheus;
mod system;

pub use memory::MemoryMetrics;
pub use prometheus::PrometheusMetrics;
pub use system::SystemCollector;

use {std::collections::BTreeMap, std::sync::Arc};

/// Label pairs attached to an instrument. Ordered so the identity key is
/// independent of insertion order.
pub type Labels = BTreeMap<String, String>;

/// Builds a `Labels` map from pairs.
pub fn labels<const N: usize>(pairs: [(&str, &str); N]) -> Labels {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Default histogram buckets, in seconds, matching typical request
/// latencies.
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Default summary quantiles.
pub const DEFAULT_QUANTILES: &[f64] = &[0.5, 0.9, 0.99];

/// A monotonically increasing counter.
pub trait Counter: Send + Sync {
    /// Adds one.
    fn inc(&self) {
        self.add(1);
    }
    /// Adds a non-negative integer delta.
    fn add(&self, delta: u64);
    /// Returns the current value.
    fn get(&self) -> u64;
}

/// A gauge that can move in both directions.
pub trait Gauge: Send + Sync {
    fn set(&self, value: f64);
    fn add(&self, delta: f64);
    fn sub(&self, delta: f64) {
        self.add(-delta);
    }
    fn inc(&self) {
        self.add(1.0);
    }
    fn dec(&self) {
        self.add(-1.0);
    }
    fn get(&self) -> f64;
}

/// A histogram of observations over fixed buckets.
pub trait Histogram: Send + Sync {
    fn observe(&self, value: f64);
    /// Returns the cumulative count per bucket upper bound.
    fn bucket_counts(&self) -> Vec<(f64, u64)>;
    fn sum(&self) -> f64;
    fn count(&self) -> u64;
}

/// A summary reporting quantiles over a sliding window of observations.
pub trait Summary: Send + Sync {
    fn observe(&self, value: f64);
    /// Returns the estimated value at quantile `q` (0..=1), or None before
    /// the first observation.
    fn quantile(&self, q: f64) -> Option<f64>;
    fn count(&self) -> u64;
}

/// A metrics backend producing the four instrument families.
pub trait MetricsBackend: Send + Sync {
    /// Returns the counter for `(name, labels)`, creating it on first use.
    fn counter(&self, name: &str, labels: &Labels) -> Arc<dyn Counter>;

    /// Returns the gauge for `(name, labels)`, creating it on first use.
    fn gauge(&self, name: &str, labels: &Labels) -> Arc<dyn Gauge>;

    /// Returns the histogram for `(name, labels)`, creating it on first
    /// use with the given buckets.
    fn histogram(&self, name: &str, labels: &Labels, buckets: &[f64]) -> Arc<dyn Histogram>;

    /// Returns the summary for `(name, labels)`, creating it on first use
    /// with the given quantiles.
    fn summary(&self, name: &str, labels: &Labels, quantiles: &[f64]) -> Arc<dyn Summary>;
}

/// Composes the identity key of an instrument from its name and sorted
/// labels.
pub(crate) fn instrument_key(name: &str, labels: &Labels) -> String {
    let mut key = String::with_capacity(name.len() + labels.len() * 16);
    key.push_str(name);
    for (label, value) in labels {
        key.push('\u{1f}');
        key.push_str(label);
        key.push('=');
        key.push_str(value);
    }
    key
}

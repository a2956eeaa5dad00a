//! The in-memory metrics backend.

use {
    super::{Counter, Gauge, Histogram, Labels, MetricsBackend, Summary, instrument_key},
    parking_lot::{Mutex, RwLock},
    std::collections::HashMap,
    std::sync::Arc,
    std::sync::atomic::{AtomicU64, Ordering},
};

/// Observations kept per summary window.
const SUMMARY_WINDOW: usize = 1024;

#[derive(Default)]
struct MemoryCounter {
    value: AtomicU64,
}

impl Counter for MemoryCounter {
    fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct MemoryGauge {
    value: Mutex<f64>,
}

impl Gauge for MemoryGauge {
    fn set(&self, value: f64) {
        *self.value.lock() = value;
    }

    fn add(&self, delta: f64) {
        *self.value.lock() += delta;
    }

    fn get(&self) -> f64 {
        *self.value.lock()
    }
}

struct MemoryHistogram {
    uppers: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum: Mutex<f64>,
    total: AtomicU64,
}

impl MemoryHistogram {
    fn new(buckets: &[f64]) -> Self {
        let mut uppers: Vec<f64> = buckets.to_vec();
        uppers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let counts = (0..uppers.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            uppers,
            counts,
            sum: Mutex::new(0.0),
            total: AtomicU64::new(0),
        }
    }
}

impl Histogram for MemoryHistogram {
    fn observe(&self, value: f64) {
        for (upper, count) in self.uppers.iter().zip(&self.counts) {
            if value <= *upper {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
        *self.sum.lock() += value;
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    fn bucket_counts(&self) -> Vec<(f64, u64)> {
        self.uppers
            .iter()
            .zip(&self.counts)
            .map(|(upper, count)| (*upper, count.load(Ordering::Relaxed)))
            .collect()
    }

    fn sum(&self) -> f64 {
        *self.sum.lock()
    }

    fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

struct MemorySummary {
    window: Mutex<Vec<f64>>,
    total: AtomicU64,
    #[allow(dead_code)]
    quantiles: Vec<f64>,
}

impl MemorySummary {
    fn new(quantiles: &[f64]) -> Self {
        Self {
            window: Mutex::new(Vec::with_capacity(SUMMARY_WINDOW)),
            total: AtomicU64::new(0),
            quantiles: quantiles.to_vec(),
        }
    }
}

impl Summary for MemorySummary {
    fn observe(&self, value: f64) {
        let mut window = self.window.lock();
        if window.len() >= SUMMARY_WINDOW {
            // Sliding window: evict the oldest observation.
            window.remove(0);
        }
        window.push(value);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    fn quantile(&self, q: f64) -> Option<f64> {
        let window = self.window.lock();
        if window.is_empty() {
            return None;
        }
        let mut sorted = window.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((sorted.len() - 1) as f64 * q.clamp(0.0, 1.0)).round() as usize;
        Some(sorted[rank])
    }

    fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Reference backend keeping every instrument in process memory.
///
/// Useful for tests and for services that export metrics through their own
/// surface instead of Prometheus.
#[derive(Default)]
pub struct MemoryMetrics {
    counters: RwLock<HashMap<String, Arc<MemoryCounter>>>,
    gauges: RwLock<HashMap<String, Arc<MemoryGauge>>>,
    histograms: RwLock<HashMap<String, Arc<MemoryHistogram>>>,
    summaries: RwLock<HashMap<String, Arc<MemorySummary>>>,
}

impl MemoryMetrics {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsBackend for MemoryMetrics {
    fn counter(&self, name: &str, labels: &Labels) -> Arc<dyn Counter> {
        let key = instrument_key(name, labels);
        if let Some(counter) = self.counters.read().get(&key) {
            return Arc::clone(counter) as Arc<dyn Counter>;
        }
        let mut counters = self.counters.write();
        let counter = counters
            .entry(key)
            .or_insert_with(|| Arc::new(MemoryCounter::default()));
        Arc::clone(counter) as Arc<dyn Counter>
    }

    fn gauge(&self, name: &str, labels: &Labels) -> Arc<dyn Gauge> {
        let key = instrument_key(name, labels);
        if let Some(gauge) = self.gauges.read().get(&key) {
            return Arc::clone(gauge) as Arc<dyn Gauge>;
        }
        let mut gauges = self.gauges.write();
        let gauge = gauges
            .entry(key)
            .or_insert_with(|| Arc::new(MemoryGauge::default()));
        Arc::clone(gauge) as Arc<dyn Gauge>
    }

    fn histogram(&self, name: &str, labels: &Labels, buckets: &[f64]) -> Arc<dyn Histogram> {
        let key = instrument_key(name, labels);
        if let Some(histogram) = self.histograms.read().get(&key) {
            return Arc::clone(histogram) as Arc<dyn Histogram>;
        }
        let mut histograms = self.histograms.write();
        let histogram = histograms
            .entry(key)
            .or_insert_with(|| Arc::new(MemoryHistogram::new(buckets)));
        Arc::clone(histogram) as Arc<dyn Histogram>
    }

    fn summary(&self, name: &str, labels: &Labels, quantiles: &[f64]) -> Arc<dyn Summary> {
        let key = instrument_key(name, labels);
        if let Some(summary) = self.summaries.read().get(&key) {
            return Arc::clone(summary) as Arc<dyn Summary>;
        }
        let mut summaries = self.summaries.write();
        let summary = summaries
            .entry(key)
            .or_insert_with(|| Arc::new(MemorySummary::new(quantiles)));
        Arc::clone(summary) as Arc<dyn Summary>
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{DEFAULT_BUCKETS, DEFAULT_QUANTILES, labels};

    #[test]
    fn test_counter_increments() {
        let backend = MemoryMetrics::new();
        let counter = backend.counter("requests_total", &Labels::new());
        counter.inc();
        counter.add(4);
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn test_same_identity_returns_same_instrument() {
        let backend = MemoryMetrics::new();
        let labels = labels([("route", "/users")]);
        let a = backend.counter("requests_total", &labels);
        let b = backend.counter("requests_total", &labels);
        a.inc();
        assert_eq!(b.get(), 1);
    }

    #[test]
    fn test_different_labels_are_distinct() {
        let backend = MemoryMetrics::new();
        let a = backend.counter("requests_total", &labels([("route", "/a")]));
        let b = backend.counter("requests_total", &labels([("route", "/b")]));
        a.inc();
        assert_eq!(b.get(), 0);
    }

    #[test]
    fn test_gauge_moves_both_directions() {
        let backend = MemoryMetrics::new();
        let gauge = backend.gauge("inflight", &Labels::new());
        gauge.set(10.0);
        gauge.inc();
        gauge.dec();
        gauge.add(2.5);
        gauge.sub(0.5);
        assert!((gauge.get() - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let backend = MemoryMetrics::new();
        let histogram = backend.histogram("latency", &Labels::new(), &[0.1, 1.0, 10.0]);
        histogram.observe(0.05);
        histogram.observe(0.5);
        histogram.observe(5.0);

        let buckets = histogram.bucket_counts();
        assert_eq!(buckets[0], (0.1, 1));
        assert_eq!(buckets[1], (1.0, 2));
        assert_eq!(buckets[2], (10.0, 3));
        assert_eq!(histogram.count(), 3);
        assert!((histogram.sum() - 5.55).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_default_buckets() {
        let backend = MemoryMetrics::new();
        let histogram = backend.histogram("latency", &Labels::new(), DEFAULT_BUCKETS);
        histogram.observe(0.003);
        assert_eq!(histogram.bucket_counts()[0].1, 1);
    }

    #[test]
    fn test_summary_quantiles() {
        let backend = MemoryMetrics::new();
        let summary = backend.summary("duration", &Labels::new(), DEFAULT_QUANTILES);
        assert!(summary.quantile(0.5).is_none());

        for i in 1..=100 {
            summary.observe(i as f64);
        }
        assert_eq!(summary.count(), 100);

        let median = summary.quantile(0.5).unwrap();
        assert!((45.0..=55.0).contains(&median));
        let p99 = summary.quantile(0.99).unwrap();
        assert!(p99 >= 98.0);
    }

    #[test]
    fn test_summary_window_slides() {
        let backend = MemoryMetrics::new();
        let summary = backend.summary("duration", &Labels::new(), DEFAULT_QUANTILES);
        for _ in 0..(SUMMARY_WINDOW + 10) {
            summary.observe(1.0);
        }
        assert_eq!(summary.count() as usize, SUMMARY_WINDOW + 10);
        assert_eq!(summary.quantile(0.5), Some(1.0));
    }
}

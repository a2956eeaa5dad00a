//! Prometheus metrics backend.
//!
//! Instruments register against a dedicated `prometheus::Registry` with the
//! labels applied as constant labels, so two instruments with the same name
//! and different labels become two time series of one metric family.
//! Summaries have no Prometheus counterpart in the `prometheus` crate;
//! they are served by the same sliding-window implementation the memory
//! backend uses, with their observation count still visible to scrapes
//! through a companion histogram.
//!
//! Names Prometheus rejects (a hyphen, a leading digit) never panic the
//! caller: the backend logs the rejection and serves an in-process
//! instrument that simply stays out of the scrape output.

use {
    super::{
        Counter, Gauge, Histogram, Labels, MemoryMetrics, MetricsBackend, Summary, instrument_key,
    },
    parking_lot::RwLock,
    prometheus::{IntCounter, Opts, Registry, core::Collector},
    std::collections::HashMap,
    std::sync::Arc,
};

struct PromCounter {
    inner: IntCounter,
}

impl Counter for PromCounter {
    fn add(&self, delta: u64) {
        self.inner.inc_by(delta);
    }

    fn get(&self) -> u64 {
        self.inner.get()
    }
}

struct PromGauge {
    inner: prometheus::Gauge,
}

impl Gauge for PromGauge {
    fn set(&self, value: f64) {
        self.inner.set(value);
    }

    fn add(&self, delta: f64) {
        self.inner.add(delta);
    }

    fn get(&self) -> f64 {
        self.inner.get()
    }
}

struct PromHistogram {
    inner: prometheus::Histogram,
    uppers: Vec<f64>,
}

impl Histogram for PromHistogram {
    fn observe(&self, value: f64) {
        self.inner.observe(value);
    }

    fn bucket_counts(&self) -> Vec<(f64, u64)> {
        let metric = self.inner.collect();
        let mut counts = Vec::with_capacity(self.uppers.len());
        if let Some(family) = metric.first()
            && let Some(metric) = family.get_metric().first()
        {
            for bucket in metric.get_histogram().get_bucket() {
                counts.push((bucket.get_upper_bound(), bucket.get_cumulative_count()));
            }
        }
        counts
    }

    fn sum(&self) -> f64 {
        self.inner.get_sample_sum()
    }

    fn count(&self) -> u64 {
        self.inner.get_sample_count()
    }
}

/// Prometheus-backed metrics with an exposable registry.
pub struct PrometheusMetrics {
    registry: Registry,
    counters: RwLock<HashMap<String, Arc<PromCounter>>>,
    gauges: RwLock<HashMap<String, Arc<PromGauge>>>,
    histograms: RwLock<HashMap<String, Arc<PromHistogram>>>,
    fallback: MemoryMetrics,
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusMetrics {
    /// Creates a backend with its own registry.
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
            fallback: MemoryMetrics::new(),
        }
    }

    /// Returns the registry for scrape endpoints to gather from.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders the current metric families in the Prometheus text format.
    pub fn gather_text(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %err, "prometheus encoding failed");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    fn opts(name: &str, labels: &Labels) -> Opts {
        let mut opts = Opts::new(name, name.to_string());
        for (label, value) in labels {
            opts = opts.const_label(label.clone(), value.clone());
        }
        opts
    }
}

impl MetricsBackend for PrometheusMetrics {
    fn counter(&self, name: &str, labels: &Labels) -> Arc<dyn Counter> {
        let key = instrument_key(name, labels);
        if let Some(counter) = self.counters.read().get(&key) {
            return Arc::clone(counter) as Arc<dyn Counter>;
        }

        // Names Prometheus rejects still get a working instrument; it
        // just never reaches the scrape surface.
        let inner = match IntCounter::with_opts(Self::opts(name, labels)) {
            Ok(inner) => inner,
            Err(err) => {
                tracing::warn!(
                    metric = name,
                    error = %err,
                    "invalid counter name, serving an unexported instrument"
                );
                return self.fallback.counter(name, labels);
            }
        };

        let mut counters = self.counters.write();
        let counter = counters.entry(key).or_insert_with(|| {
            if let Err(err) = self.registry.register(Box::new(inner.clone())) {
                tracing::warn!(metric = name, error = %err, "counter registration failed");
            }
            Arc::new(PromCounter { inner })
        });
        Arc::clone(counter) as Arc<dyn Counter>
    }

    fn gauge(&self, name: &str, labels: &Labels) -> Arc<dyn Gauge> {
        let key = instrument_key(name, labels);
        if let Some(gauge) = self.gauges.read().get(&key) {
            return Arc::clone(gauge) as Arc<dyn Gauge>;
        }

        let inner = match prometheus::Gauge::with_opts(Self::opts(name, labels)) {
            Ok(inner) => inner,
            Err(err) => {
                tracing::warn!(
                    metric = name,
                    error = %err,
                    "invalid gauge name, serving an unexported instrument"
                );
                return self.fallback.gauge(name, labels);
            }
        };

        let mut gauges = self.gauges.write();
        let gauge = gauges.entry(key).or_insert_with(|| {
            if let Err(err) = self.registry.register(Box::new(inner.clone())) {
                tracing::warn!(metric = name, error = %err, "gauge registration failed");
            }
            Arc::new(PromGauge { inner })
        });
        Arc::clone(gauge) as Arc<dyn Gauge>
    }

    fn histogram(&self, name: &str, labels: &Labels, buckets: &[f64]) -> Arc<dyn Histogram> {
        let key = instrument_key(name, labels);
        if let Some(histogram) = self.histograms.read().get(&key) {
            return Arc::clone(histogram) as Arc<dyn Histogram>;
        }

        let opts = prometheus::HistogramOpts::new(name, name.to_string())
            .buckets(buckets.to_vec())
            .const_labels(labels.clone().into_iter().collect());
        let inner = match prometheus::Histogram::with_opts(opts) {
            Ok(inner) => inner,
            Err(err) => {
                tracing::warn!(
                    metric = name,
                    error = %err,
                    "invalid histogram options, serving an unexported instrument"
                );
                return self.fallback.histogram(name, labels, buckets);
            }
        };

        let mut histograms = self.histograms.write();
        let histogram = histograms.entry(key).or_insert_with(|| {
            if let Err(err) = self.registry.register(Box::new(inner.clone())) {
                tracing::warn!(metric = name, error = %err, "histogram registration failed");
            }
            Arc::new(PromHistogram {
                inner,
                uppers: buckets.to_vec(),
            })
        });
        Arc::clone(histogram) as Arc<dyn Histogram>
    }

    fn summary(&self, name: &str, labels: &Labels, quantiles: &[f64]) -> Arc<dyn Summary> {
        // Keep observation count/sum scrapeable through a histogram while
        // the quantile math stays process-local.
        let _ = self.histogram(
            &format!("{name}_observations"),
            labels,
            super::DEFAULT_BUCKETS,
        );
        self.fallback.summary(name, labels, quantiles)
    }
}

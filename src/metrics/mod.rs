use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Prometheus metrics for one index
#[derive(Clone)]
pub struct EngineMetrics {
    // Counters
    pub batches: IntCounter,
    pub updates: IntCounter,
    pub deletes: IntCounter,
    pub batch_errors: IntCounter,
    pub async_errors: IntCounter,
    pub merges: IntCounter,
    pub persists: IntCounter,

    // Gauges
    pub root_epoch: IntGauge,
    pub root_segments: IntGauge,

    // Histograms
    pub batch_latency: Histogram,
    pub merge_latency: Histogram,
    pub persist_latency: Histogram,

    registry: Arc<Registry>,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let c = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let g = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn histogram(registry: &Registry, name: &str, help: &str) -> Result<Histogram, prometheus::Error> {
    let h = Histogram::with_opts(
        HistogramOpts::new(name, help)
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
    )?;
    registry.register(Box::new(h.clone()))?;
    Ok(h)
}

impl EngineMetrics {
    /// Create metrics on a fresh registry, so several indexes can live in
    /// one process
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let batches = counter(&registry, "cuttle_batches_total", "Batches applied")?;
        let updates = counter(&registry, "cuttle_updates_total", "Documents inserted or replaced")?;
        let deletes = counter(&registry, "cuttle_deletes_total", "Documents deleted")?;
        let batch_errors = counter(&registry, "cuttle_batch_errors_total", "Batches that failed")?;
        let async_errors = counter(
            &registry,
            "cuttle_async_errors_total",
            "Errors raised by background persistence and merging",
        )?;
        let merges = counter(&registry, "cuttle_merges_total", "Segment merges introduced")?;
        let persists = counter(&registry, "cuttle_persists_total", "Epochs committed to the catalog")?;

        let root_epoch = gauge(&registry, "cuttle_root_epoch", "Epoch of the current root snapshot")?;
        let root_segments = gauge(&registry, "cuttle_root_segments", "Segments in the current root")?;

        let batch_latency = histogram(&registry, "cuttle_batch_latency_seconds", "Batch latency")?;
        let merge_latency = histogram(&registry, "cuttle_merge_latency_seconds", "Merge latency")?;
        let persist_latency = histogram(
            &registry,
            "cuttle_persist_latency_seconds",
            "Latency of persisting one epoch",
        )?;

        Ok(Self {
            batches,
            updates,
            deletes,
            batch_errors,
            async_errors,
            merges,
            persists,
            root_epoch,
            root_segments,
            batch_latency,
            merge_latency,
            persist_latency,
            registry: Arc::new(registry),
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Record a successful batch
    pub fn record_batch(&self, updates: u64, deletes: u64, duration_secs: f64) {
        self.batches.inc();
        self.updates.inc_by(updates);
        self.deletes.inc_by(deletes);
        self.batch_latency.observe(duration_secs);
    }

    pub fn record_batch_error(&self) {
        self.batch_errors.inc();
    }

    pub fn record_merge(&self, duration_secs: f64) {
        self.merges.inc();
        self.merge_latency.observe(duration_secs);
    }

    pub fn record_persist(&self, duration_secs: f64) {
        self.persists.inc();
        self.persist_latency.observe(duration_secs);
    }

    pub fn set_root(&self, epoch: u64, segments: usize) {
        self.root_epoch.set(epoch as i64);
        self.root_segments.set(segments as i64);
    }

    /// Text exposition of every metric
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

//! Controller metrics
//!
//! Prometheus counters for the discovery pipeline. Formatted only when the
//! registry is gathered, never on the hot path.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Controller metrics registry
    pub static ref CONTROLLER_METRICS_REGISTRY: Registry = Registry::new();

    /// Reconciliation duration
    static ref RECONCILIATION_DURATION: Histogram = {
        let opts = HistogramOpts::new(
            "portti_reconciliation_duration_seconds",
            "Discovery reconciliation duration in seconds",
        );
        let histogram = Histogram::with_opts(opts).expect("Failed to create histogram");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("Failed to register histogram");
        histogram
    };

    /// Reconciliations total
    static ref RECONCILIATIONS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "portti_reconciliations_total",
            "Total number of discovery reconciliations",
        );
        let counter =
            IntCounterVec::new(opts, &["result"]).expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Watch events applied to the resource store
    static ref WATCH_EVENTS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "portti_watch_events_total",
            "Total number of watch events applied to the resource store",
        );
        let counter =
            IntCounterVec::new(opts, &["kind", "op"]).expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Cluster events handed to the broadcaster
    static ref KUBE_EVENTS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "portti_kube_events_total",
            "Total number of cluster events sent or dropped by the broadcaster",
        );
        let counter =
            IntCounterVec::new(opts, &["result"]).expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Published configuration snapshots
    static ref SNAPSHOTS_PUBLISHED_TOTAL: IntCounter = {
        let opts = Opts::new(
            "portti_snapshots_published_total",
            "Total number of configuration snapshots published",
        );
        let counter = IntCounter::with_opts(opts).expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };
}

/// Record a discovery reconciliation
pub fn record_reconciliation(duration_secs: f64, result: &str) {
    RECONCILIATION_DURATION.observe(duration_secs);
    RECONCILIATIONS_TOTAL.with_label_values(&[result]).inc();
}

/// Record a watch event applied to the store
pub fn record_watch_event(kind: &str, op: &str) {
    WATCH_EVENTS_TOTAL.with_label_values(&[kind, op]).inc();
}

/// Record a cluster event outcome
pub fn record_kube_event(result: &str) {
    KUBE_EVENTS_TOTAL.with_label_values(&[result]).inc();
}

/// Record a published snapshot
pub fn record_snapshot_published() {
    SNAPSHOTS_PUBLISHED_TOTAL.inc();
}

/// Gather controller metrics
pub fn gather_controller_metrics() -> Result<String, String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = CONTROLLER_METRICS_REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert to UTF-8: {}", e))
}

//! Metrics collection and export module
//!
//! Each [`Metrics`] owns its own registry; nothing is registered globally,
//! so several clients (or tests) can coexist in one process.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Instant;

/// Confirmation pipeline metrics
pub struct Metrics {
    registry: Registry,

    // Counters
    pub submissions_total: IntCounter,
    pub submission_failures: IntCounter,
    pub submission_retries: IntCounter,
    pub status_polls: IntCounter,
    pub poll_errors: IntCounterVec,
    pub outcomes: IntCounterVec,

    // Gauges
    pub in_flight: IntGauge,

    // Histograms
    pub confirmation_latency: Histogram,
    pub rpc_latency: Histogram,
    pub build_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let submissions_total = IntCounter::with_opts(Opts::new(
            "submissions_total",
            "Total number of transactions handed to the network",
        ))?;

        let submission_failures = IntCounter::with_opts(Opts::new(
            "submission_failures",
            "Number of transactions the node refused or never accepted",
        ))?;

        let submission_retries = IntCounter::with_opts(Opts::new(
            "submission_retries",
            "Resubmissions after transient failures",
        ))?;

        let status_polls = IntCounter::with_opts(Opts::new(
            "status_polls",
            "Number of signature status polls issued",
        ))?;

        let poll_errors = IntCounterVec::new(
            Opts::new("poll_errors", "Status poll failures by error category"),
            &["category"],
        )?;

        let outcomes = IntCounterVec::new(
            Opts::new("confirmation_outcomes", "Terminal confirmation outcomes"),
            &["outcome"],
        )?;

        let in_flight = IntGauge::with_opts(Opts::new(
            "confirmations_in_flight",
            "Number of confirmations currently being tracked",
        ))?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "confirmation_latency_seconds",
                "Time from submission to target commitment",
            )
            .buckets(vec![0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 51.2]),
        )?;

        let rpc_latency = Histogram::with_opts(
            HistogramOpts::new("rpc_latency_seconds", "RPC call latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;

        let build_latency = Histogram::with_opts(
            HistogramOpts::new("build_latency_seconds", "Transaction build latency")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]),
        )?;

        // Register all metrics
        registry.register(Box::new(submissions_total.clone()))?;
        registry.register(Box::new(submission_failures.clone()))?;
        registry.register(Box::new(submission_retries.clone()))?;
        registry.register(Box::new(status_polls.clone()))?;
        registry.register(Box::new(poll_errors.clone()))?;
        registry.register(Box::new(outcomes.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;
        registry.register(Box::new(rpc_latency.clone()))?;
        registry.register(Box::new(build_latency.clone()))?;

        Ok(Self {
            registry,
            submissions_total,
            submission_failures,
            submission_retries,
            status_polls,
            poll_errors,
            outcomes,
            in_flight,
            confirmation_latency,
            rpc_latency,
            build_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text format
    pub fn export_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_poll_error(&self, category: &str) {
        self.poll_errors.with_label_values(&[category]).inc();
    }

    /// Count a confirmation as in flight until the guard drops
    pub fn track_in_flight(&self) -> InFlightGuard {
        self.in_flight.inc();
        InFlightGuard {
            gauge: self.in_flight.clone(),
        }
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("in_flight", &self.in_flight.get())
            .finish_non_exhaustive()
    }
}

/// Decrements the in-flight gauge on drop
pub struct InFlightGuard {
    gauge: IntGauge,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

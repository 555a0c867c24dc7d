//! Operator Metrics
//!
//! Prometheus metrics for resolution passes, exposed on `/metrics`.

use crate::classes::ClassSnapshot;
use crate::error::{Error, Result};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Outcome label of a resolution pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassResult {
    /// Every volume and container resolved
    Resolved,
    /// A resolver failed; recorded on the Defaults condition
    Failed,
    /// Generation already observed
    Skipped,
}

impl PassResult {
    fn label(self) -> &'static str {
        match self {
            PassResult::Resolved => "resolved",
            PassResult::Failed => "failed",
            PassResult::Skipped => "skipped",
        }
    }
}

/// Metrics for the defaulting engine
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    passes: IntCounterVec,
    errors: IntCounterVec,
    defined_failures: IntCounter,
    pass_duration: Histogram,
    classes: IntGaugeVec,
}

impl Metrics {
    /// Create metrics in a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let passes = IntCounterVec::new(
            Opts::new("resolution_passes_total", "Resolution passes by outcome"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let errors = IntCounterVec::new(
            Opts::new("resolution_errors_total", "Resolution failures by error kind"),
            &["kind"],
        )
        .map_err(metrics_error)?;
        let defined_failures = IntCounter::new(
            "defined_check_failures_total",
            "Resolved specs found referencing a missing or inactive class",
        )
        .map_err(metrics_error)?;
        let pass_duration = Histogram::with_opts(
            HistogramOpts::new(
                "resolution_pass_duration_seconds",
                "Duration of one resolution pass",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )
        .map_err(metrics_error)?;
        let classes = IntGaugeVec::new(
            Opts::new("class_registry_classes", "Valid classes in the registry"),
            &["kind", "scope"],
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(passes.clone())).map_err(metrics_error)?;
        registry.register(Box::new(errors.clone())).map_err(metrics_error)?;
        registry
            .register(Box::new(defined_failures.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(pass_duration.clone()))
            .map_err(metrics_error)?;
        registry.register(Box::new(classes.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            passes,
            errors,
            defined_failures,
            pass_duration,
            classes,
        })
    }

    pub fn record_pass(&self, result: PassResult, elapsed: Duration) {
        self.passes.with_label_values(&[result.label()]).inc();
        if result != PassResult::Skipped {
            self.pass_duration.observe(elapsed.as_secs_f64());
        }
    }

    pub fn record_error(&self, reason: &str) {
        self.errors.with_label_values(&[reason]).inc();
    }

    pub fn record_defined_failure(&self) {
        self.defined_failures.inc();
    }

    /// Refresh the class gauges from a snapshot
    pub fn observe_classes(&self, snapshot: &ClassSnapshot) {
        self.classes.reset();
        for ((kind, scope), count) in snapshot.counts() {
            self.classes
                .with_label_values(&[kind.to_string().as_str(), scope])
                .set(count as i64);
        }
    }

    /// Passes recorded for an outcome
    pub fn passes(&self, result: PassResult) -> u64 {
        self.passes.with_label_values(&[result.label()]).get()
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics encoding: {e}")))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {e}"))
}

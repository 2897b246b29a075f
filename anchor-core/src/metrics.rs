//! Metrics collection for observability
//!
//! Prometheus metrics on a private registry, so several engines can live in
//! one process (tests included).
//!
//! # Metrics
//!
//! - `anchor_transactions_created_total` - Transactions created
//! - `anchor_uploads_total` - Successful ledger uploads
//! - `anchor_upload_failures_total` - Failed ledger uploads
//! - `anchor_upload_duration_seconds` - Histogram of upload latencies
//! - `anchor_reconciliations_total{outcome}` - Applied reconciliation verdicts
//! - `anchor_events_ingested_total` - New ledger events recorded
//! - `anchor_poll_errors_total` - Failed reconciliation polls

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::fmt;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transactions created
    pub transactions_created: IntCounter,

    /// Successful uploads
    pub uploads_total: IntCounter,

    /// Failed uploads
    pub upload_failures: IntCounter,

    /// Upload duration histogram
    pub upload_duration: Histogram,

    /// Reconciliations by outcome
    pub reconciliations: IntCounterVec,

    /// Ledger events recorded
    pub events_ingested: IntCounter,

    /// Failed polls
    pub poll_errors: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_created = IntCounter::new(
            "anchor_transactions_created_total",
            "Total number of transactions created",
        )?;
        registry.register(Box::new(transactions_created.clone()))?;

        let uploads_total =
            IntCounter::new("anchor_uploads_total", "Total number of successful ledger uploads")?;
        registry.register(Box::new(uploads_total.clone()))?;

        let upload_failures = IntCounter::new(
            "anchor_upload_failures_total",
            "Total number of failed ledger uploads",
        )?;
        registry.register(Box::new(upload_failures.clone()))?;

        let upload_duration = Histogram::with_opts(
            HistogramOpts::new(
                "anchor_upload_duration_seconds",
                "Histogram of ledger upload latencies",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(upload_duration.clone()))?;

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "anchor_reconciliations_total",
                "Total number of applied reconciliation verdicts",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(reconciliations.clone()))?;

        let events_ingested = IntCounter::new(
            "anchor_events_ingested_total",
            "Total number of new ledger events recorded",
        )?;
        registry.register(Box::new(events_ingested.clone()))?;

        let poll_errors = IntCounter::new(
            "anchor_poll_errors_total",
            "Total number of failed reconciliation polls",
        )?;
        registry.register(Box::new(poll_errors.clone()))?;

        Ok(Self {
            transactions_created,
            uploads_total,
            upload_failures,
            upload_duration,
            reconciliations,
            events_ingested,
            poll_errors,
            registry,
        })
    }

    /// Record an upload attempt
    pub fn record_upload(&self, success: bool, duration_secs: f64) {
        self.upload_duration.observe(duration_secs);
        if success {
            self.uploads_total.inc();
        } else {
            self.upload_failures.inc();
        }
    }

    /// Record an applied verdict
    pub fn record_reconciliation(&self, outcome: &str) {
        self.reconciliations.with_label_values(&[outcome]).inc();
    }

    /// Text exposition of every metric
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("uploads_total", &self.uploads_total.get())
            .field("upload_failures", &self.upload_failures.get())
            .finish_non_exhaustive()
    }
}

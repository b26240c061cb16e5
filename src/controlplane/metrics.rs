//! Controller Metrics
//!
//! Prometheus counters and latency histograms per controller operation,
//! kept in a registry owned by the service.

use crate::error::{Error, ErrorCode, Result};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

const NAMESPACE: &str = "csi_controller";

/// Operation metrics for the controller service
#[derive(Clone)]
pub struct ControllerMetrics {
    registry: Registry,
    requests: IntCounterVec,
    errors: IntCounterVec,
    duration: HistogramVec,
}

impl ControllerMetrics {
    /// Create and register all controller metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("requests_total", "Controller requests by operation").namespace(NAMESPACE),
            &["operation"],
        )
        .map_err(metrics_error)?;
        let errors = IntCounterVec::new(
            Opts::new("errors_total", "Failed controller requests by operation and code")
                .namespace(NAMESPACE),
            &["operation", "code"],
        )
        .map_err(metrics_error)?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "request_duration_seconds",
                "Duration of controller requests",
            )
            .namespace(NAMESPACE),
            &["operation"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(requests.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(errors.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            requests,
            errors,
            duration,
        })
    }

    /// Record one finished request
    pub fn observe(&self, operation: &str, elapsed: Duration, code: Option<ErrorCode>) {
        self.requests.with_label_values(&[operation]).inc();
        self.duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
        if let Some(code) = code {
            self.errors
                .with_label_values(&[operation, code.as_str()])
                .inc();
        }
    }

    /// Requests seen for an operation
    pub fn requests(&self, operation: &str) -> u64 {
        self.requests.with_label_values(&[operation]).get()
    }

    /// Failures seen for an operation with the given code
    pub fn errors(&self, operation: &str, code: ErrorCode) -> u64 {
        self.errors
            .with_label_values(&[operation, code.as_str()])
            .get()
    }

    /// Render the registry in the Prometheus text format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

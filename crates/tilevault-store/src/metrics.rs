//! Prometheus series exported by the backends.
//!
//! Series are created unregistered; the embedding process registers the
//! collectors returned by `Backend::metrics`.

use prometheus::core::Collector;
use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

use crate::error::StoreResult;

/// Series for [`LocalBackend`](crate::LocalBackend).
#[derive(Clone)]
pub struct LocalMetrics {
    /// `fs_op_duration_seconds{method}`
    pub op_duration: HistogramVec,
}

impl LocalMetrics {
    pub fn new() -> StoreResult<Self> {
        let op_duration = HistogramVec::new(
            HistogramOpts::new(
                "fs_op_duration_seconds",
                "Overall local filesystem operation latency, including fsyncs.",
            ),
            &["method"],
        )?;
        Ok(Self { op_duration })
    }

    pub fn collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![Box::new(self.op_duration.clone())]
    }
}

/// Series for [`ObjectBackend`](crate::ObjectBackend).
#[derive(Clone)]
pub struct ObjectMetrics {
    /// `object_request_duration_seconds{method, code}`, one sample per attempt.
    pub request_duration: HistogramVec,
    /// `object_upload_size_bytes`
    pub upload_size: Histogram,
    /// `object_hedges_total`
    pub hedges: IntCounter,
    /// `object_hedges_successful_total`
    pub hedge_wins: IntCounter,
    /// `object_errors_total{retryable, errorcode}`
    pub errors: IntCounterVec,
}

impl ObjectMetrics {
    pub fn new() -> StoreResult<Self> {
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "object_request_duration_seconds",
                "Object storage request latency per attempt.",
            ),
            &["method", "code"],
        )?;
        let upload_size = Histogram::with_opts(
            HistogramOpts::new("object_upload_size_bytes", "Object storage upload sizes.")
                .buckets(prometheus::exponential_buckets(256.0, 4.0, 10)?),
        )?;
        let hedges = IntCounter::with_opts(Opts::new(
            "object_hedges_total",
            "Hedged upload requests launched.",
        ))?;
        let hedge_wins = IntCounter::with_opts(Opts::new(
            "object_hedges_successful_total",
            "Hedged upload requests whose result was returned.",
        ))?;
        let errors = IntCounterVec::new(
            Opts::new(
                "object_errors_total",
                "Object storage errors per attempt, by classification.",
            ),
            &["retryable", "errorcode"],
        )?;
        Ok(Self {
            request_duration,
            upload_size,
            hedges,
            hedge_wins,
            errors,
        })
    }

    pub fn collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![
            Box::new(self.request_duration.clone()),
            Box::new(self.upload_size.clone()),
            Box::new(self.hedges.clone()),
            Box::new(self.hedge_wins.clone()),
            Box::new(self.errors.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    #[test]
    fn object_series_register_without_conflict() {
        let metrics = ObjectMetrics::new().unwrap();
        let registry = Registry::new();
        for collector in metrics.collectors() {
            registry.register(collector).unwrap();
        }
        metrics.hedges.inc();
        metrics.upload_size.observe(1024.0);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"object_hedges_total".to_string()));
        assert!(names.contains(&"object_hedges_successful_total".to_string()));
        assert!(names.contains(&"object_upload_size_bytes".to_string()));
    }

    #[test]
    fn local_series_record_by_method() {
        let metrics = LocalMetrics::new().unwrap();
        metrics
            .op_duration
            .with_label_values(&["upload"])
            .observe(0.01);
        assert_eq!(
            metrics
                .op_duration
                .with_label_values(&["upload"])
                .get_sample_count(),
            1
        );
    }
}

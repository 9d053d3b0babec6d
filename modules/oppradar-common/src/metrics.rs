//! Metrics sink interface injected into each component.
//!
//! Counters, gauges, and histograms are forwarded to the external
//! observability collaborator; no statistics accumulate in process memory
//! beyond what a sink implementation chooses to buffer.

/// Label pairs are static-keyed to keep call sites cheap and greppable.
pub type Labels<'a> = &'a [(&'static str, &'a str)];

pub trait MetricsSink: Send + Sync {
    fn counter(&self, name: &'static str, value: u64, labels: Labels);
    fn gauge(&self, name: &'static str, value: f64, labels: Labels);
    fn histogram(&self, name: &'static str, value: f64, labels: Labels);
}

/// Default sink: structured tracing output at debug level.
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn counter(&self, name: &'static str, value: u64, labels: Labels) {
        tracing::debug!(metric = name, value, labels = ?labels, "counter");
    }

    fn gauge(&self, name: &'static str, value: f64, labels: Labels) {
        tracing::debug!(metric = name, value, labels = ?labels, "gauge");
    }

    fn histogram(&self, name: &'static str, value: f64, labels: Labels) {
        tracing::debug!(metric = name, value, labels = ?labels, "histogram");
    }
}

/// Discards everything.
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn counter(&self, _name: &'static str, _value: u64, _labels: Labels) {}
    fn gauge(&self, _name: &'static str, _value: f64, _labels: Labels) {}
    fn histogram(&self, _name: &'static str, _value: f64, _labels: Labels) {}
}

//! Metric definitions and the helpers that emit them.
//!
//! Services declare each metric once as a [`MetricDef`] constant and emit it
//! through that constant, so names never drift between call sites.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    /// Durations in milliseconds, reported as statsd timings.
    Timer,
}

impl MetricType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "Counter",
            MetricType::Timer => "Timer",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

impl MetricDef {
    pub fn increment(&self) {
        debug_assert_eq!(self.metric_type, MetricType::Counter, "{}", self.name);
        metrics::counter!(self.name).increment(1);
    }

    pub fn record_duration(&self, elapsed: Duration) {
        debug_assert_eq!(self.metric_type, MetricType::Timer, "{}", self.name);
        metrics::histogram!(self.name).record(elapsed.as_secs_f64() * 1000.0);
    }
}

// Service metrics.
//
// Counters, gauges and a duration histogram for:
// - Submissions and their classified outcomes
// - Runtime invocations (zero for anything the validator blocked)
// - Resource limit violations (wall clock, memory, output)
// - Host-side service faults
// - HTTP requests by status class

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::types::OutcomeKind;

/// Counter metric (monotonically increasing)
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge metric (can go up or down)
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        // Never wraps below zero, even if a decrement races ahead.
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Holds a gauge up for as long as it lives
pub struct GaugeGuard<'a> {
    gauge: &'a Gauge,
}

impl<'a> GaugeGuard<'a> {
    pub fn new(gauge: &'a Gauge) -> Self {
        gauge.inc();
        Self { gauge }
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[derive(Debug)]
pub struct HistogramBucket {
    pub le: f64, // upper bound in seconds
    pub count: AtomicU64,
}

#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    sum: AtomicU64, // microseconds
    count: AtomicU64,
}

impl Histogram {
    /// Buckets sized for snippet runs: most finish in milliseconds, the slow
    /// tail sits at the wall-clock ceiling.
    pub fn new_latency() -> Self {
        let bounds = [
            0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
        ];
        Self {
            buckets: bounds
                .iter()
                .map(|&le| HistogramBucket {
                    le,
                    count: AtomicU64::new(0),
                })
                .collect(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        self.sum
            .fetch_add(value.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        for bucket in &self.buckets {
            if seconds <= bucket.le {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum_micros(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn get_bucket_count(&self, le: f64) -> u64 {
        self.buckets
            .iter()
            .find(|b| (b.le - le).abs() < 1e-9)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct MetricsRegistry {
    pub submissions_total: Counter,

    pub outcomes_success: Counter,
    pub outcomes_blocked: Counter,
    pub outcomes_runtime_fault: Counter,
    pub outcomes_resource_exceeded: Counter,

    pub runtime_invocations: Counter,
    pub service_faults: Counter,

    pub limit_violations_wall: Counter,
    pub limit_violations_memory: Counter,
    pub limit_violations_output: Counter,

    pub http_requests_2xx: Counter,
    pub http_requests_4xx: Counter,
    pub http_requests_5xx: Counter,

    pub active_executions: Gauge,

    pub execution_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            submissions_total: Counter::new(),
            outcomes_success: Counter::new(),
            outcomes_blocked: Counter::new(),
            outcomes_runtime_fault: Counter::new(),
            outcomes_resource_exceeded: Counter::new(),
            runtime_invocations: Counter::new(),
            service_faults: Counter::new(),
            limit_violations_wall: Counter::new(),
            limit_violations_memory: Counter::new(),
            limit_violations_output: Counter::new(),
            http_requests_2xx: Counter::new(),
            http_requests_4xx: Counter::new(),
            http_requests_5xx: Counter::new(),
            active_executions: Gauge::new(),
            execution_duration: Histogram::new_latency(),
        }
    }

    pub fn outcome_counter(&self, kind: OutcomeKind) -> &Counter {
        match kind {
            OutcomeKind::Success => &self.outcomes_success,
            OutcomeKind::Blocked => &self.outcomes_blocked,
            OutcomeKind::RuntimeFault => &self.outcomes_runtime_fault,
            OutcomeKind::ResourceExceeded => &self.outcomes_resource_exceeded,
        }
    }

    pub fn record_outcome(&self, kind: OutcomeKind) {
        self.outcome_counter(kind).inc();
    }

    pub fn record_http_status(&self, status: u16) {
        match status {
            200..=399 => self.http_requests_2xx.inc(),
            400..=499 => self.http_requests_4xx.inc(),
            _ => self.http_requests_5xx.inc(),
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        metric_header(&mut out, "learnbox_submissions_total", "Submissions received", "counter");
        let _ = writeln!(out, "learnbox_submissions_total {}", self.submissions_total.get());

        metric_header(&mut out, "learnbox_outcomes_total", "Classified outcomes by kind", "counter");
        for kind in OutcomeKind::ALL {
            let _ = writeln!(
                out,
                "learnbox_outcomes_total{{kind=\"{}\"}} {}",
                kind,
                self.outcome_counter(kind).get()
            );
        }

        metric_header(
            &mut out,
            "learnbox_runtime_invocations_total",
            "Submissions handed to an execution backend",
            "counter",
        );
        let _ = writeln!(
            out,
            "learnbox_runtime_invocations_total {}",
            self.runtime_invocations.get()
        );

        metric_header(&mut out, "learnbox_limit_violations_total", "Resource limit violations", "counter");
        for (limit, counter) in [
            ("wall_clock", &self.limit_violations_wall),
            ("memory", &self.limit_violations_memory),
            ("output", &self.limit_violations_output),
        ] {
            let _ = writeln!(
                out,
                "learnbox_limit_violations_total{{limit=\"{}\"}} {}",
                limit,
                counter.get()
            );
        }

        metric_header(&mut out, "learnbox_service_faults_total", "Host-side failures", "counter");
        let _ = writeln!(out, "learnbox_service_faults_total {}", self.service_faults.get());

        metric_header(&mut out, "learnbox_http_requests_total", "HTTP responses by status class", "counter");
        for (class, counter) in [
            ("2xx", &self.http_requests_2xx),
            ("4xx", &self.http_requests_4xx),
            ("5xx", &self.http_requests_5xx),
        ] {
            let _ = writeln!(
                out,
                "learnbox_http_requests_total{{class=\"{}\"}} {}",
                class,
                counter.get()
            );
        }

        metric_header(&mut out, "learnbox_active_executions", "Executions in progress", "gauge");
        let _ = writeln!(out, "learnbox_active_executions {}", self.active_executions.get());

        metric_header(
            &mut out,
            "learnbox_execution_duration_seconds",
            "Time spent in the execution backend",
            "histogram",
        );
        for bucket in &self.execution_duration.buckets {
            let _ = writeln!(
                out,
                "learnbox_execution_duration_seconds_bucket{{le=\"{}\"}} {}",
                bucket.le,
                bucket.count.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(
            out,
            "learnbox_execution_duration_seconds_bucket{{le=\"+Inf\"}} {}",
            self.execution_duration.get_count()
        );
        let _ = writeln!(
            out,
            "learnbox_execution_duration_seconds_sum {}",
            self.execution_duration.get_sum_micros() as f64 / 1_000_000.0
        );
        let _ = writeln!(
            out,
            "learnbox_execution_duration_seconds_count {}",
            self.execution_duration.get_count()
        );

        out
    }
}

fn metric_header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Process-wide registry used by the server
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_and_gauge() {
        let counter = Counter::new();
        counter.inc();
        counter.add(4);
        assert_eq!(counter.get(), 5);

        let gauge = Gauge::new();
        gauge.dec();
        assert_eq!(gauge.get(), 0);
        {
            let _a = GaugeGuard::new(&gauge);
            let _b = GaugeGuard::new(&gauge);
            assert_eq!(gauge.get(), 2);
        }
        assert_eq!(gauge.get(), 0);
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let histogram = Histogram::new_latency();
        histogram.observe(Duration::from_millis(3));
        histogram.observe(Duration::from_millis(80));
        histogram.observe(Duration::from_secs(2));

        assert_eq!(histogram.get_count(), 3);
        assert_eq!(histogram.get_bucket_count(0.005), 1);
        assert_eq!(histogram.get_bucket_count(0.1), 2);
        assert_eq!(histogram.get_bucket_count(2.5), 3);
        assert_eq!(histogram.get_bucket_count(0.0005), 0);
    }

    #[test]
    fn test_outcome_and_status_recording() {
        let metrics = MetricsRegistry::new();
        metrics.record_outcome(OutcomeKind::Success);
        metrics.record_outcome(OutcomeKind::Blocked);
        metrics.record_outcome(OutcomeKind::Blocked);
        metrics.record_http_status(200);
        metrics.record_http_status(404);
        metrics.record_http_status(500);

        assert_eq!(metrics.outcomes_success.get(), 1);
        assert_eq!(metrics.outcomes_blocked.get(), 2);
        assert_eq!(metrics.outcomes_runtime_fault.get(), 0);
        assert_eq!(metrics.http_requests_2xx.get(), 1);
        assert_eq!(metrics.http_requests_4xx.get(), 1);
        assert_eq!(metrics.http_requests_5xx.get(), 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsRegistry::new();
        metrics.submissions_total.add(2);
        metrics.record_outcome(OutcomeKind::ResourceExceeded);
        metrics.limit_violations_wall.inc();
        metrics.execution_duration.observe(Duration::from_millis(1));

        let text = metrics.export_prometheus();
        assert!(text.contains("learnbox_submissions_total 2"));
        assert!(text.contains("learnbox_outcomes_total{kind=\"resource_exceeded\"} 1"));
        assert!(text.contains("learnbox_outcomes_total{kind=\"success\"} 0"));
        assert!(text.contains("learnbox_limit_violations_total{limit=\"wall_clock\"} 1"));
        assert!(text.contains("learnbox_execution_duration_seconds_count 1"));
        assert!(text.contains("# TYPE learnbox_active_executions gauge"));
    }

    #[test]
    fn test_global_metrics() {
        assert!(Arc::ptr_eq(&get_metrics(), &get_metrics()));
    }
}

//! Observability infrastructure for the pod monitor
//!
//! Provides:
//! - Prometheus metrics (pod events, alert candidates, suppression, dispatch outcomes)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};

/// Histogram buckets for dispatch latency (in seconds), capped near the 5s client timeout
const DISPATCH_LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    pod_events: IntCounterVec,
    pods_mirrored: IntGauge,
    alert_candidates: IntCounterVec,
    alerts_suppressed: IntCounter,
    dispatches: IntCounterVec,
    dispatch_latency_seconds: Histogram,
    suppression_cache_entries: IntGauge,
    handler_failures: IntCounter,
    watch_errors: IntCounter,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            pod_events: register_int_counter_vec!(
                "pod_monitor_pod_events_total",
                "Pod lifecycle events delivered to handlers",
                &["kind"]
            )
            .expect("Failed to register pod_events_total"),

            pods_mirrored: register_int_gauge!(
                "pod_monitor_pods_mirrored",
                "Number of pods in the local mirror"
            )
            .expect("Failed to register pods_mirrored"),

            alert_candidates: register_int_counter_vec!(
                "pod_monitor_alert_candidates_total",
                "Healthy to bad transitions detected",
                &["reason"]
            )
            .expect("Failed to register alert_candidates_total"),

            alerts_suppressed: register_int_counter!(
                "pod_monitor_alerts_suppressed_total",
                "Alert candidates dropped by the suppression window"
            )
            .expect("Failed to register alerts_suppressed_total"),

            dispatches: register_int_counter_vec!(
                "pod_monitor_dispatch_total",
                "Alert dispatch attempts by outcome",
                &["outcome"]
            )
            .expect("Failed to register dispatch_total"),

            dispatch_latency_seconds: register_histogram!(
                "pod_monitor_dispatch_latency_seconds",
                "Time spent delivering an alert to the analysis endpoint",
                DISPATCH_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register dispatch_latency_seconds"),

            suppression_cache_entries: register_int_gauge!(
                "pod_monitor_suppression_cache_entries",
                "Number of alert records held by the suppression cache"
            )
            .expect("Failed to register suppression_cache_entries"),

            handler_failures: register_int_counter!(
                "pod_monitor_handler_failures_total",
                "Pod event handlers that returned an error or panicked"
            )
            .expect("Failed to register handler_failures_total"),

            watch_errors: register_int_counter!(
                "pod_monitor_watch_errors_total",
                "Errors reported by the pod watch stream"
            )
            .expect("Failed to register watch_errors_total"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share
/// the same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_pod_event(&self, kind: &str) {
        self.inner().pod_events.with_label_values(&[kind]).inc();
    }

    pub fn set_pods_mirrored(&self, count: i64) {
        self.inner().pods_mirrored.set(count);
    }

    pub fn inc_alert_candidate(&self, reason: &str) {
        self.inner()
            .alert_candidates
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_alerts_suppressed(&self) {
        self.inner().alerts_suppressed.inc();
    }

    pub fn inc_dispatch(&self, outcome: &str) {
        self.inner().dispatches.with_label_values(&[outcome]).inc();
    }

    pub fn observe_dispatch_latency(&self, duration_secs: f64) {
        self.inner().dispatch_latency_seconds.observe(duration_secs);
    }

    pub fn set_suppression_cache_entries(&self, count: i64) {
        self.inner().suppression_cache_entries.set(count);
    }

    pub fn inc_handler_failures(&self) {
        self.inner().handler_failures.inc();
    }

    pub fn inc_watch_errors(&self) {
        self.inner().watch_errors.inc();
    }
}

/// Structured logger for monitor events
///
/// Emits consistently named events so log pipelines can filter on `event`.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, analysis_endpoint: &str, suppression_window: Duration) {
        info!(
            event = "monitor_started",
            node = %self.node_name,
            monitor_version = %version,
            analysis_endpoint = %analysis_endpoint,
            suppression_window_secs = suppression_window.as_secs(),
            "Pod monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Pod monitor shutting down"
        );
    }

    pub fn log_initial_sync(&self, pods: usize, elapsed: Duration) {
        info!(
            event = "initial_sync_complete",
            node = %self.node_name,
            pods = pods,
            elapsed_ms = elapsed.as_millis() as u64,
            "Pod mirror synced"
        );
    }

    /// Log a healthy to bad transition
    pub fn log_candidate(&self, pod_key: &str, reason: &str) {
        info!(
            event = "alert_candidate",
            node = %self.node_name,
            pod = %pod_key,
            reason = %reason,
            "Pod entered bad state"
        );
    }

    pub fn log_suppressed(&self, pod_key: &str, reason: &str, since_last: Option<Duration>, window: Duration) {
        info!(
            event = "alert_suppressed",
            node = %self.node_name,
            pod = %pod_key,
            reason = %reason,
            since_last_secs = since_last.map(|d| d.as_secs()),
            window_secs = window.as_secs(),
            "Alert suppressed, pod already alerted within window"
        );
    }

    pub fn log_dispatched(&self, pod_key: &str, reason: &str, status: u16) {
        info!(
            event = "alert_dispatched",
            node = %self.node_name,
            pod = %pod_key,
            reason = %reason,
            status = status,
            "Analysis triggered"
        );
    }

    pub fn log_dispatch_failed(&self, pod_key: &str, reason: &str, error: &str) {
        error!(
            event = "alert_dispatch_failed",
            node = %self.node_name,
            pod = %pod_key,
            reason = %reason,
            error = %error,
            "Failed to trigger analysis"
        );
    }

    pub fn log_watch_error(&self, error: &str) {
        warn!(
            event = "watch_error",
            node = %self.node_name,
            error = %error,
            "Pod watch stream reported an error"
        );
    }
}

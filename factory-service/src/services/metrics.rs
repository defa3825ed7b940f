use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once; only the
/// first call installs anything.
pub fn init_metrics() {
    METRICS_HANDLE.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            // Another recorder is already global; keep a detached handle so
            // /metrics still answers.
            PrometheusBuilder::new().build_recorder().handle()
        }
    });
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

/// Times a database operation into `db_query_duration_seconds`.
pub struct QueryTimer {
    operation: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    pub fn observe_duration(self) {
        histogram!("db_query_duration_seconds", "operation" => self.operation)
            .record(self.start.elapsed().as_secs_f64());
    }
}

pub fn record_payment_initiated(plan_type: &'static str) {
    counter!("payments_initiated_total", "plan_type" => plan_type).increment(1);
}

pub fn record_webhook_event(event: &str, outcome: &'static str) {
    counter!(
        "webhook_events_total",
        "event" => event.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_tokens_credited(tokens: i64) {
    if tokens > 0 {
        counter!("tokens_credited_total").increment(tokens as u64);
    }
}

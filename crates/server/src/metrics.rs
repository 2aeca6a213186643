//! Prometheus text-exposition metrics for the `GET /metrics` endpoint.
//!
//! Counters are plain `AtomicU64`s bumped from the proxy handler and the
//! background loops; there's no aggregation crate here because the data
//! model is a handful of monotonic counters, not the histogram/quantile
//! surface a full metrics library is built for.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared counters, cloned (via `Arc`) into every request task and
/// background loop that needs to bump one.
#[derive(Default)]
pub struct ServerMetrics {
    requests_total: AtomicU64,
    requests_2xx: AtomicU64,
    requests_4xx: AtomicU64,
    requests_5xx: AtomicU64,
    rate_limited_total: AtomicU64,
    quota_exceeded_total: AtomicU64,
    auth_rejected_total: AtomicU64,
    webhook_dispatched_total: AtomicU64,
    webhook_retry_swept_total: AtomicU64,
}

impl ServerMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_status(&self, status: u16) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        match status {
            200..=299 => self.requests_2xx.fetch_add(1, Ordering::Relaxed),
            400..=499 => self.requests_4xx.fetch_add(1, Ordering::Relaxed),
            _ => self.requests_5xx.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quota_exceeded(&self) {
        self.quota_exceeded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_rejected(&self) {
        self.auth_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_webhooks_dispatched(&self, count: u64) {
        self.webhook_dispatched_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_webhook_retry_sweep(&self, count: u64) {
        self.webhook_retry_swept_total.fetch_add(count, Ordering::Relaxed);
    }

    fn snapshot(&self) -> [(&'static str, u64); 9] {
        [
            ("apigate_requests_total", self.requests_total.load(Ordering::Relaxed)),
            ("apigate_requests_2xx_total", self.requests_2xx.load(Ordering::Relaxed)),
            ("apigate_requests_4xx_total", self.requests_4xx.load(Ordering::Relaxed)),
            ("apigate_requests_5xx_total", self.requests_5xx.load(Ordering::Relaxed)),
            ("apigate_rate_limited_total", self.rate_limited_total.load(Ordering::Relaxed)),
            ("apigate_quota_exceeded_total", self.quota_exceeded_total.load(Ordering::Relaxed)),
            ("apigate_auth_rejected_total", self.auth_rejected_total.load(Ordering::Relaxed)),
            ("apigate_webhook_dispatched_total", self.webhook_dispatched_total.load(Ordering::Relaxed)),
            ("apigate_webhook_retry_swept_total", self.webhook_retry_swept_total.load(Ordering::Relaxed)),
        ]
    }
}

/// Render the counters plus the two gauges the usage/webhook subsystems
/// expose directly (buffer drop count, buffer depth proxy) in Prometheus
/// text exposition format.
#[must_use]
pub fn render(metrics: &ServerMetrics, usage_dropped: u64) -> String {
    let mut buf = String::new();
    for (name, value) in metrics.snapshot() {
        write_counter(&mut buf, name, value);
    }
    write_counter(&mut buf, "apigate_usage_events_dropped_total", usage_dropped);
    buf
}

fn write_counter(buf: &mut String, name: &str, value: u64) {
    buf.push_str("# TYPE ");
    buf.push_str(name);
    buf.push_str(" counter\n");
    buf.push_str(name);
    buf.push(' ');
    buf.push_str(&value.to_string());
    buf.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_every_counter_name() {
        let metrics = ServerMetrics::new();
        metrics.record_status(200);
        metrics.record_rate_limited();
        let text = render(&metrics, 3);
        assert!(text.contains("apigate_requests_total 1"));
        assert!(text.contains("apigate_requests_2xx_total 1"));
        assert!(text.contains("apigate_rate_limited_total 1"));
        assert!(text.contains("apigate_usage_events_dropped_total 3"));
    }
}

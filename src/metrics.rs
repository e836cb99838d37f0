//! Prometheus metrics.
//!
//! Recording is a no-op until [`init`] installs the global recorder, so
//! library users and unit tests never need a recorder.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder once per process and return its handle.
pub fn init() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if let Err(e) = metrics::set_global_recorder(recorder) {
                warn!("Metrics recorder already installed: {}", e);
            }
            handle
        })
        .clone()
}

/// Count a finished proxy request by outcome kind and status
pub fn record_request(kind: &'static str, status: u16) {
    counter!("relay_requests_total", "kind" => kind, "status" => status.to_string()).increment(1);
}

pub fn record_duration(kind: &'static str, start: Instant) {
    histogram!("relay_request_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

/// Count a cache lookup in the given namespace
pub fn record_cache_lookup(namespace: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("relay_cache_lookups_total", "namespace" => namespace, "result" => result)
        .increment(1);
}

pub fn record_cache_write_failure() {
    counter!("relay_cache_write_failures_total").increment(1);
}

/// Count an upstream fetch by result (`ok`, `http_error`, `network_error`)
pub fn record_upstream(result: &'static str, start: Instant) {
    counter!("relay_upstream_fetches_total", "result" => result).increment(1);
    histogram!("relay_upstream_duration_seconds", "result" => result)
        .record(start.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let first = init();
        let second = init();
        record_request("manifest", 200);
        record_cache_lookup("proxy_raw", true);
        let rendered = second.render();
        assert!(rendered.contains("relay_requests_total"));
        drop(first);
    }
}

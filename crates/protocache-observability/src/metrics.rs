//! protocache metrics definitions.
//!
//! All metrics use OpenTelemetry conventions and are exported by whatever
//! meter provider the application installs (OTLP, Prometheus, ...).

use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};
use std::time::Duration;

use protocache_core::error::SourceError;
use protocache_core::observer::RefreshObserver;

/// Central metrics handle for protocache.
#[derive(Clone)]
pub struct ProtoCacheMetrics {
    pub refresh_success: Counter<u64>,
    pub refresh_failures: Counter<u64>,
    pub types_loaded: Counter<u64>,
    pub refresh_latency_ms: Histogram<f64>,
}

impl ProtoCacheMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            refresh_success: meter
                .u64_counter("protocache.refresh_success")
                .with_description("Sources refreshed without error, including up-to-date ones")
                .init(),
            refresh_failures: meter
                .u64_counter("protocache.refresh_failures")
                .with_description("Sources whose fetch or decode failed")
                .init(),
            types_loaded: meter
                .u64_counter("protocache.types_loaded")
                .with_description("Type definitions applied to the store")
                .init(),
            refresh_latency_ms: meter
                .f64_histogram("protocache.refresh_latency_ms")
                .with_description("Time to fetch, decode and apply one source in milliseconds")
                .init(),
        }
    }

    /// Metrics on the global meter provider under the `protocache` scope.
    pub fn global() -> Self {
        Self::new(&opentelemetry::global::meter("protocache"))
    }

    pub fn record_loaded(&self, url: &str, types: usize, elapsed: Duration) {
        let attrs = [
            KeyValue::new("url", url.to_string()),
            KeyValue::new("outcome", "loaded"),
        ];
        self.refresh_success.add(1, &attrs);
        self.types_loaded
            .add(types as u64, &[KeyValue::new("url", url.to_string())]);
        self.refresh_latency_ms
            .record(elapsed.as_secs_f64() * 1000.0, &[KeyValue::new("url", url.to_string())]);
    }

    pub fn record_up_to_date(&self, url: &str) {
        self.refresh_success.add(
            1,
            &[
                KeyValue::new("url", url.to_string()),
                KeyValue::new("outcome", "up_to_date"),
            ],
        );
    }

    pub fn record_failure(&self, url: &str, error_kind: &'static str) {
        self.refresh_failures.add(
            1,
            &[
                KeyValue::new("url", url.to_string()),
                KeyValue::new("error_type", error_kind),
            ],
        );
    }
}

impl RefreshObserver for ProtoCacheMetrics {
    fn on_source_loaded(&self, url: &str, types: usize, elapsed: Duration) {
        self.record_loaded(url, types, elapsed);
    }

    fn on_source_up_to_date(&self, url: &str) {
        self.record_up_to_date(url);
    }

    fn on_source_failed(&self, url: &str, error: &SourceError) {
        self.record_failure(url, error.kind());
    }
}

impl std::fmt::Debug for ProtoCacheMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtoCacheMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocache_core::error::FetchError;
    use std::sync::Arc;

    #[test]
    fn records_through_the_observer_interface() {
        // no meter provider installed, so the global one is a no-op
        let observer: Arc<dyn RefreshObserver> = Arc::new(ProtoCacheMetrics::global());
        observer.on_source_loaded("http://a", 3, Duration::from_millis(12));
        observer.on_source_up_to_date("http://a");
        observer.on_source_failed("http://b", &FetchError::Client("tls".into()).into());
    }
}

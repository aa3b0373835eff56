//! # protocache-observability
//!
//! OpenTelemetry metrics and structured logging for protocache.
//!
//! ## Built-in metrics
//! - `protocache.refresh_success`: counter, tagged with source url + outcome
//! - `protocache.refresh_failures`: counter, tagged with source url + error kind
//! - `protocache.types_loaded`: counter, tagged with source url
//! - `protocache.refresh_latency_ms`: histogram
//!
//! [`ProtoCacheMetrics`] implements `RefreshObserver`; hand it to the
//! client builder to record every refresh.
//!
//! ## Structured logging
//! Text or JSON logs via `tracing-subscriber`, with levels configurable per
//! component.

pub mod metrics;
pub mod tracing_setup;

pub use metrics::ProtoCacheMetrics;
pub use tracing_setup::{init_tracing, LogConfig};

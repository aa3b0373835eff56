//! # protocache-remote
//!
//! Remote side of protocache: downloading descriptor sets over HTTP,
//! running refresh cycles on a timer and the [`DescriptorClient`] that ties
//! it together.
//!
//! ```no_run
//! use protocache_remote::{ClientConfig, DescriptorClient};
//!
//! # async fn run() -> Result<(), protocache_remote::ClientError> {
//! let mut config = ClientConfig::new(["http://registry.local/v1/descriptors/events"]);
//! config.auto_refresh = true;
//!
//! let client = DescriptorClient::new(config).await?;
//! if let Some(def) = client.get_descriptor("events.Click") {
//!     println!("{} has {} fields", def.full_name(), def.fields().len());
//! }
//! client.close();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod http;
pub mod refresh;
pub mod timer;

pub use client::{ClientBuilder, ClientError, DescriptorClient};
pub use config::{parse_header, ClientConfig, HttpConfig};
pub use http::{HttpFetcher, HttpFetcherConfig};
pub use refresh::{
    MergeMode, RefreshCoordinator, RefreshReport, RefreshStrategy, Source, SourceOutcome,
    SourceReport,
};
pub use timer::TokioScheduler;

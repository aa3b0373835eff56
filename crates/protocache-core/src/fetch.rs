//! The `Fetcher` trait: byte retrieval for a descriptor source URL.
//!
//! The trait is object-safe so fetchers can be stored as
//! `Arc<dyn Fetcher>` inside the refresh coordinator.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::error::FetchError;

/// Retrieves the raw descriptor-set bytes published at a URL.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` so a single fetcher can be shared
/// between the scheduled refresh task and on-demand callers.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Fetch the body at `url`. Network failures, timeouts and non-2xx
    /// responses are reported as [`FetchError`], never as decode errors.
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        (**self).fetch(url).await
    }
}

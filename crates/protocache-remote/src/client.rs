//! The user-facing `DescriptorClient`.
//!
//! Wires a [`RefreshCoordinator`] to an HTTP fetcher and, when auto refresh
//! is on, to a scheduler. Construction performs one synchronous refresh and
//! fails if any source fails, so a client that exists has loaded every
//! configured URL at least once.

use futures::FutureExt;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

use protocache_core::error::{CodecError, ConfigError, FetchError};
use protocache_core::fetch::Fetcher;
use protocache_core::observer::{NoopObserver, RefreshObserver};
use protocache_core::schedule::{ScheduledTask, Scheduler, TimerHandle};
use protocache_registry::{DescriptorStore, DynamicMessage, TypeDefinition};

use crate::config::ClientConfig;
use crate::http::HttpFetcher;
use crate::refresh::{RefreshCoordinator, RefreshReport, Source};
use crate::timer::TokioScheduler;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unknown schema '{0}'")]
    NotFound(String),

    #[error("initial descriptor load failed: {0}")]
    InitialRefresh(RefreshReport),

    #[error("descriptor refresh failed: {0}")]
    Refresh(RefreshReport),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("fetcher setup failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("value could not be converted to JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Errors a refresh may cure: the schema is missing, or the payload
    /// does not fit the schema we have.
    fn is_stale_schema(&self) -> bool {
        matches!(
            self,
            ClientError::NotFound(_)
                | ClientError::Codec(CodecError::UnknownField { .. })
                | ClientError::Codec(CodecError::UnknownEnumValue { .. })
                | ClientError::Codec(CodecError::InvalidValue { .. })
        )
    }
}

/// Builder for [`DescriptorClient`]. Defaults: [`HttpFetcher`] from the
/// config, [`TokioScheduler`] on the current runtime, no observer.
pub struct ClientBuilder {
    config: ClientConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    observer: Arc<dyn RefreshObserver>,
}

impl ClientBuilder {
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn RefreshObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Validate the config, load every source once and start the timer.
    pub async fn build(self) -> Result<DescriptorClient, ClientError> {
        let config = self.config;
        config.validate()?;

        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(f) => f,
            None => Arc::new(HttpFetcher::new(config.fetcher_config())?),
        };
        let coordinator = Arc::new(
            RefreshCoordinator::new(fetcher, Arc::new(DescriptorStore::new()))
                .with_observer(self.observer)
                .with_strategy(config.refresh_strategy)
                .with_java_class_names(config.java_class_names),
        );
        let sources: Arc<[Source]> = config.sources().into();

        let report = coordinator.refresh(&sources).await;
        if !report.is_success() {
            return Err(ClientError::InitialRefresh(report));
        }
        info!(
            sources = sources.len(),
            types = coordinator.store().len(),
            "descriptor client ready"
        );

        let timer = if config.auto_refresh {
            let scheduler: Arc<dyn Scheduler> = match self.scheduler {
                Some(s) => s,
                None => Arc::new(TokioScheduler::current()),
            };
            Some(scheduler.schedule(
                config.interval(),
                refresh_task(Arc::clone(&coordinator), Arc::clone(&sources)),
            ))
        } else {
            None
        };

        Ok(DescriptorClient {
            coordinator,
            sources,
            timer: Mutex::new(timer),
        })
    }
}

fn refresh_task(coordinator: Arc<RefreshCoordinator>, sources: Arc<[Source]>) -> ScheduledTask {
    Arc::new(move || {
        let coordinator = Arc::clone(&coordinator);
        let sources = Arc::clone(&sources);
        async move {
            let report = coordinator.refresh(&sources).await;
            if report.is_success() {
                debug!(%report, "scheduled refresh done");
            } else {
                warn!(%report, "scheduled refresh incomplete");
            }
        }
        .boxed()
    })
}

/// Caches descriptors from remote URLs and decodes/encodes messages with them.
pub struct DescriptorClient {
    coordinator: Arc<RefreshCoordinator>,
    sources: Arc<[Source]>,
    timer: Mutex<Option<TimerHandle>>,
}

impl DescriptorClient {
    /// Build a client with default collaborators.
    pub async fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::builder(config).build().await
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            fetcher: None,
            scheduler: None,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn get_descriptor(&self, name: &str) -> Option<TypeDefinition> {
        self.coordinator.store().lookup(name)
    }

    pub fn store(&self) -> &Arc<DescriptorStore> {
        self.coordinator.store()
    }

    /// Decode `bytes` as a message of type `name`.
    pub fn parse(&self, name: &str, bytes: &[u8]) -> Result<DynamicMessage, ClientError> {
        let def = self.require(name)?;
        Ok(def.decode(bytes)?)
    }

    /// Like [`parse`](Self::parse), but if the message carries unknown
    /// fields, refresh once and decode again with the newer schema.
    pub async fn parse_with_refresh(
        &self,
        name: &str,
        bytes: &[u8],
    ) -> Result<DynamicMessage, ClientError> {
        let msg = self.parse(name, bytes)?;
        if !msg.has_unknown_fields() {
            return Ok(msg);
        }
        debug!(name, "unknown fields in message, refreshing descriptors");
        self.refresh_checked().await?;
        self.parse(name, bytes)
    }

    /// Encode any serde-serializable value as message `name`, going through
    /// its JSON representation.
    pub fn serialize<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<Vec<u8>, ClientError> {
        let json = serde_json::to_value(value)?;
        let def = self.require(name)?;
        Ok(def.encode_json(&json)?)
    }

    /// Like [`serialize`](Self::serialize), but refresh once and retry when
    /// the schema is missing or does not accept the value.
    pub async fn serialize_with_refresh<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<Vec<u8>, ClientError> {
        match self.serialize(name, value) {
            Err(e) if e.is_stale_schema() => {
                debug!(name, error = %e, "serialize failed, refreshing descriptors");
                self.refresh_checked().await?;
                self.serialize(name, value)
            }
            other => other,
        }
    }

    /// Refresh every source now.
    pub async fn refresh(&self) -> RefreshReport {
        self.coordinator.refresh(&self.sources).await
    }

    /// Stop the background timer. Lookups keep working on the last snapshot.
    pub fn close(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut handle) = timer.take() {
            handle.cancel();
            info!("descriptor client closed");
        }
    }

    async fn refresh_checked(&self) -> Result<(), ClientError> {
        let report = self.refresh().await;
        if report.is_success() {
            Ok(())
        } else {
            Err(ClientError::Refresh(report))
        }
    }

    fn require(&self, name: &str) -> Result<TypeDefinition, ClientError> {
        self.get_descriptor(name)
            .ok_or_else(|| ClientError::NotFound(name.to_string()))
    }
}

impl std::fmt::Debug for DescriptorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorClient")
            .field("sources", &self.sources)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use protocache_registry::fixture::{descriptor_set, one_proto, FieldSpec, FileBuilder, MessageBuilder};
    use protocache_registry::{ScalarType, Value};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct MapFetcher {
        bodies: Mutex<HashMap<String, Vec<u8>>>,
        calls: AtomicUsize,
    }

    impl MapFetcher {
        fn with(self, url: &str, body: Vec<u8>) -> Self {
            self.set(url, body);
            self
        }

        fn set(&self, url: &str, body: Vec<u8>) {
            self.bodies.lock().unwrap().insert(url.to_string(), body);
        }
    }

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies
                .lock()
                .unwrap()
                .get(url)
                .map(|b| Bytes::from(b.clone()))
                .ok_or_else(|| FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                    body: String::new(),
                })
        }
    }

    /// Records schedules without running anything.
    #[derive(Default)]
    struct RecordingScheduler {
        intervals: Mutex<Vec<Duration>>,
        cancelled: Arc<AtomicUsize>,
    }

    impl Scheduler for RecordingScheduler {
        fn schedule(&self, interval: Duration, _task: ScheduledTask) -> TimerHandle {
            self.intervals.lock().unwrap().push(interval);
            let cancelled = Arc::clone(&self.cancelled);
            TimerHandle::new(move || {
                cancelled.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    fn one_v2() -> Vec<u8> {
        descriptor_set(&[FileBuilder::new("one.proto")
            .package("test")
            .syntax("proto3")
            .message(
                MessageBuilder::new("One")
                    .field(FieldSpec::scalar("field_one", 1, ScalarType::Int64))
                    .field(FieldSpec::scalar("field_two", 2, ScalarType::String)),
            )])
    }

    async fn client(fetcher: Arc<MapFetcher>) -> DescriptorClient {
        DescriptorClient::builder(ClientConfig::new(["http://reg/one"]))
            .fetcher(fetcher)
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn end_to_end_lookup() {
        let fetcher = Arc::new(MapFetcher::default().with("http://reg/one", one_proto()));
        let client = client(fetcher).await;
        assert!(client.get_descriptor("test.One").is_some());
        assert!(client.get_descriptor("test.Missing").is_none());
    }

    #[tokio::test]
    async fn failing_initial_load_is_an_error() {
        let fetcher = Arc::new(MapFetcher::default().with("http://a", one_proto()));
        let err = DescriptorClient::builder(ClientConfig::new(["http://a", "http://b"]))
            .fetcher(fetcher)
            .build()
            .await
            .unwrap_err();
        match err {
            ClientError::InitialRefresh(report) => {
                assert_eq!(report.failures().count(), 1);
                assert_eq!(report.loaded_types(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_fetching() {
        let fetcher = Arc::new(MapFetcher::default());
        let err = DescriptorClient::builder(ClientConfig::new(Vec::<String>::new()))
            .fetcher(fetcher.clone())
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(ConfigError::NoSources)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn parse_and_serialize() {
        let fetcher = Arc::new(MapFetcher::default().with("http://reg/one", one_proto()));
        let client = client(fetcher).await;

        let bytes = client.serialize("test.One", &json!({ "field_one": 12 })).unwrap();
        assert_eq!(hex::encode(&bytes), "080c");
        let msg = client.parse("test.One", &bytes).unwrap();
        assert_eq!(msg.get("field_one"), Some(&Value::I64(12)));

        assert!(matches!(
            client.parse("test.Missing", &bytes),
            Err(ClientError::NotFound(name)) if name == "test.Missing"
        ));
    }

    #[tokio::test]
    async fn parse_with_refresh_picks_up_new_fields() {
        let fetcher = Arc::new(MapFetcher::default().with("http://reg/one", one_proto()));
        let client = client(fetcher.clone()).await;

        // field_two = "hi" is unknown to the first schema
        let payload = [0x08, 0x01, 0x12, 0x02, b'h', b'i'];
        let stale = client.parse("test.One", &payload).unwrap();
        assert!(stale.has_unknown_fields());

        fetcher.set("http://reg/one", one_v2());
        let fresh = client.parse_with_refresh("test.One", &payload).await.unwrap();
        assert!(!fresh.has_unknown_fields());
        assert_eq!(fresh.get("field_two").and_then(Value::as_str), Some("hi"));
    }

    #[tokio::test]
    async fn serialize_with_refresh_retries_on_unknown_field() {
        let fetcher = Arc::new(MapFetcher::default().with("http://reg/one", one_proto()));
        let client = client(fetcher.clone()).await;
        let value = json!({ "field_one": 1, "field_two": "hi" });

        assert!(client.serialize("test.One", &value).is_err());
        fetcher.set("http://reg/one", one_v2());
        let bytes = client.serialize_with_refresh("test.One", &value).await.unwrap();
        assert_eq!(bytes, vec![0x08, 0x01, 0x12, 0x02, b'h', b'i']);
    }

    #[tokio::test]
    async fn serialize_with_refresh_reports_failed_refresh() {
        let fetcher = Arc::new(MapFetcher::default().with("http://reg/one", one_proto()));
        let client = client(fetcher.clone()).await;
        fetcher.bodies.lock().unwrap().clear();

        let err = client
            .serialize_with_refresh("test.Missing", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Refresh(_)));
        // earlier entries survive the failed refresh
        assert!(client.get_descriptor("test.One").is_some());
    }

    #[tokio::test]
    async fn auto_refresh_schedules_and_close_cancels() {
        let fetcher = Arc::new(MapFetcher::default().with("http://reg/one", one_proto()));
        let scheduler = Arc::new(RecordingScheduler::default());
        let mut config = ClientConfig::new(["http://reg/one"]);
        config.auto_refresh = true;
        config.interval_secs = 30;

        let client = DescriptorClient::builder(config)
            .fetcher(fetcher)
            .scheduler(scheduler.clone())
            .build()
            .await
            .unwrap();
        assert_eq!(*scheduler.intervals.lock().unwrap(), vec![Duration::from_secs(30)]);

        client.close();
        client.close();
        assert_eq!(scheduler.cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_timer_without_auto_refresh() {
        let fetcher = Arc::new(MapFetcher::default().with("http://reg/one", one_proto()));
        let scheduler = Arc::new(RecordingScheduler::default());
        let _client = DescriptorClient::builder(ClientConfig::new(["http://reg/one"]))
            .fetcher(fetcher)
            .scheduler(scheduler.clone())
            .build()
            .await
            .unwrap();
        assert!(scheduler.intervals.lock().unwrap().is_empty());
    }
}

//! Refresh coordinator.
//!
//! Runs one refresh cycle over an ordered list of sources: fetch, decode,
//! then merge into or replace the store. Sources are processed strictly in
//! order and a failing source never stops the ones after it. Nothing here
//! returns an error to the caller; every outcome lands in the
//! [`RefreshReport`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use protocache_core::error::SourceError;
use protocache_core::fetch::Fetcher;
use protocache_core::observer::{NoopObserver, RefreshObserver};
use protocache_registry::{decode, java_class_names, DescriptorStore};

/// How a source's decoded types are applied to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Add or overwrite entries, keeping everything else.
    #[default]
    Merge,
    /// Swap in the source's types as the whole snapshot.
    Replace,
}

/// How a source URL is polled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStrategy {
    /// Download the URL on every cycle.
    #[default]
    LongPolling,
    /// Ask `<url>/versions` first and only download `<url>/versions/<n>`
    /// when `n` is newer than the last version applied.
    VersionBased,
}

/// One descriptor source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub url: String,
    pub mode: MergeMode,
}

impl Source {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: MergeMode::Merge,
        }
    }

    pub fn with_mode(url: impl Into<String>, mode: MergeMode) -> Self {
        Self {
            url: url.into(),
            mode,
        }
    }
}

#[derive(Debug)]
pub enum SourceOutcome {
    /// Payload decoded and applied.
    Loaded { types: usize },
    /// Version index says nothing newer is published.
    UpToDate,
    Failed(SourceError),
}

#[derive(Debug)]
pub struct SourceReport {
    pub url: String,
    pub outcome: SourceOutcome,
    pub elapsed: Duration,
}

/// Result of one refresh cycle, one entry per source in order.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub sources: Vec<SourceReport>,
}

impl RefreshReport {
    /// True when no source failed.
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &SourceError)> {
        self.sources.iter().filter_map(|s| match &s.outcome {
            SourceOutcome::Failed(e) => Some((s.url.as_str(), e)),
            _ => None,
        })
    }

    /// Total types applied across all loaded sources.
    pub fn loaded_types(&self) -> usize {
        self.sources
            .iter()
            .map(|s| match s.outcome {
                SourceOutcome::Loaded { types } => types,
                _ => 0,
            })
            .sum()
    }
}

impl fmt::Display for RefreshReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failures().count();
        write!(
            f,
            "{} source(s), {} type(s) loaded, {} failed",
            self.sources.len(),
            self.loaded_types(),
            failed
        )?;
        for (url, err) in self.failures() {
            write!(f, "; {url}: {err}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct VersionIndex {
    versions: Vec<i64>,
}

/// Drives refresh cycles against a shared [`DescriptorStore`].
pub struct RefreshCoordinator {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<DescriptorStore>,
    observer: Arc<dyn RefreshObserver>,
    strategy: RefreshStrategy,
    java_class_names: bool,
    /// Last version applied per source URL (version-based strategy only).
    /// A URL with no entry counts as version 0.
    versions: Mutex<HashMap<String, i64>>,
    /// Held for the duration of a cycle so scheduled and on-demand
    /// refreshes never interleave.
    cycle: tokio::sync::Mutex<()>,
}

impl RefreshCoordinator {
    pub fn new(fetcher: Arc<dyn Fetcher>, store: Arc<DescriptorStore>) -> Self {
        Self {
            fetcher,
            store,
            observer: Arc::new(NoopObserver),
            strategy: RefreshStrategy::default(),
            java_class_names: false,
            versions: Mutex::new(HashMap::new()),
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RefreshObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_strategy(mut self, strategy: RefreshStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Key types by Java class name instead of proto full name.
    pub fn with_java_class_names(mut self, enabled: bool) -> Self {
        self.java_class_names = enabled;
        self
    }

    pub fn store(&self) -> &Arc<DescriptorStore> {
        &self.store
    }

    /// Run one refresh cycle over `sources`, in order.
    pub async fn refresh(&self, sources: &[Source]) -> RefreshReport {
        let _cycle = self.cycle.lock().await;
        let mut report = RefreshReport::default();

        for source in sources {
            let started = Instant::now();
            let outcome = match self.refresh_source(source).await {
                Ok(Some(types)) => SourceOutcome::Loaded { types },
                Ok(None) => SourceOutcome::UpToDate,
                Err(e) => SourceOutcome::Failed(e),
            };
            let elapsed = started.elapsed();

            match &outcome {
                SourceOutcome::Loaded { types } => {
                    info!(url = %source.url, types, elapsed_ms = elapsed.as_millis() as u64, "descriptor source loaded");
                    self.observer.on_source_loaded(&source.url, *types, elapsed);
                }
                SourceOutcome::UpToDate => {
                    debug!(url = %source.url, "descriptor source up to date");
                    self.observer.on_source_up_to_date(&source.url);
                }
                SourceOutcome::Failed(e) => {
                    warn!(url = %source.url, kind = e.kind(), error = %e, "descriptor source failed");
                    self.observer.on_source_failed(&source.url, e);
                }
            }

            report.sources.push(SourceReport {
                url: source.url.clone(),
                outcome,
                elapsed,
            });
        }

        debug!(total = self.store.len(), "refresh cycle finished");
        report
    }

    /// `Ok(None)` means the source had nothing new to apply.
    async fn refresh_source(&self, source: &Source) -> Result<Option<usize>, SourceError> {
        match self.strategy {
            RefreshStrategy::LongPolling => {
                let payload = self.fetcher.fetch(&source.url).await?;
                self.apply(source, &payload).map(Some)
            }
            RefreshStrategy::VersionBased => self.refresh_versioned(source).await,
        }
    }

    async fn refresh_versioned(&self, source: &Source) -> Result<Option<usize>, SourceError> {
        let versions_url = format!("{}/versions", source.url.trim_end_matches('/'));
        let index = self.fetcher.fetch(&versions_url).await?;
        let index: VersionIndex =
            serde_json::from_slice(&index).map_err(|e| SourceError::VersionIndex {
                url: versions_url.clone(),
                reason: e.to_string(),
            })?;
        let latest = index
            .versions
            .iter()
            .copied()
            .max()
            .ok_or_else(|| SourceError::VersionIndex {
                url: versions_url.clone(),
                reason: "no versions published".into(),
            })?;

        // versions start above zero; nothing is applied until one is published
        let applied = self.lock_versions().get(&source.url).copied().unwrap_or(0);
        if latest <= applied {
            return Ok(None);
        }

        let payload = self
            .fetcher
            .fetch(&format!("{versions_url}/{latest}"))
            .await?;
        let types = self.apply(source, &payload)?;
        self.lock_versions().insert(source.url.clone(), latest);
        Ok(Some(types))
    }

    fn apply(&self, source: &Source, payload: &[u8]) -> Result<usize, SourceError> {
        let mut types = decode(payload)?;
        if self.java_class_names {
            types = java_class_names(types);
        }
        let count = types.len();
        match source.mode {
            MergeMode::Merge => self.store.merge(types),
            MergeMode::Replace => self.store.replace(types),
        }
        Ok(count)
    }

    fn lock_versions(&self) -> std::sync::MutexGuard<'_, HashMap<String, i64>> {
        self.versions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("strategy", &self.strategy)
            .field("java_class_names", &self.java_class_names)
            .field("store", &self.store)
            .finish()
    }
}

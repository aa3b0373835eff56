//! Tracing / logging initialisation helpers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level per component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level, e.g.
    /// `"protocache-remote" = "debug"`.
    #[serde(default)]
    pub components: BTreeMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: BTreeMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directive string, e.g. `info,protocache_remote=debug`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        for (component, level) in &self.components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Install the global subscriber for `config`, writing to stderr. Call once
/// at startup; a second call returns an error instead of replacing the
/// first subscriber.
///
/// Directives that fail to parse fall back to `info`.
pub fn init_tracing(config: &LogConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_new(config.directives()).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_component_overrides() {
        let mut cfg = LogConfig::default();
        cfg.components.insert("protocache-remote".into(), "debug".into());
        cfg.components.insert("protocache-registry".into(), "trace".into());
        assert_eq!(
            cfg.directives(),
            "info,protocache_registry=trace,protocache_remote=debug"
        );
    }

    #[test]
    fn deserializes_with_defaults() {
        let cfg: LogConfig = serde_json::from_str(r#"{ "json": true }"#).unwrap();
        assert_eq!(cfg.level, "info");
        assert!(cfg.json);
        assert!(cfg.components.is_empty());
    }

    #[test]
    fn second_init_is_an_error() {
        let cfg = LogConfig::default();
        let _ = init_tracing(&cfg);
        assert!(init_tracing(&cfg).is_err());
    }
}

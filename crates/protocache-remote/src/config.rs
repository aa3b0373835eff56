//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use protocache_core::error::ConfigError;

use crate::http::HttpFetcherConfig;
use crate::refresh::{MergeMode, RefreshStrategy, Source};

/// Configuration for a [`crate::DescriptorClient`].
///
/// Deserializable from JSON; every field except `urls` has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Descriptor-set URLs, applied in this order on every refresh.
    pub urls: Vec<String>,
    /// Seconds between scheduled refreshes.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Refresh in the background every `interval_secs`.
    #[serde(default)]
    pub auto_refresh: bool,
    #[serde(default)]
    pub merge_mode: MergeMode,
    #[serde(default)]
    pub refresh_strategy: RefreshStrategy,
    /// Key types by Java class name instead of proto full name.
    #[serde(default)]
    pub java_class_names: bool,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra request headers as `(name, value)` pairs.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            headers: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Config for `urls` with every other setting at its default.
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            interval_secs: default_interval_secs(),
            auto_refresh: false,
            merge_mode: MergeMode::default(),
            refresh_strategy: RefreshStrategy::default(),
            java_class_names: false,
            http: HttpConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.urls.is_empty() {
            return Err(ConfigError::NoSources);
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        for (name, _) in &self.http.headers {
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(ConfigError::InvalidHeader(name.clone()));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// One [`Source`] per URL, all using `merge_mode`.
    pub fn sources(&self) -> Vec<Source> {
        self.urls
            .iter()
            .map(|url| Source::with_mode(url.clone(), self.merge_mode))
            .collect()
    }

    pub fn fetcher_config(&self) -> HttpFetcherConfig {
        HttpFetcherConfig {
            timeout: Duration::from_millis(self.http.timeout_ms),
            headers: self.http.headers.clone(),
        }
    }
}

/// Parse a `NAME=VALUE` header argument.
pub fn parse_header(arg: &str) -> Result<(String, String), ConfigError> {
    match arg.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(ConfigError::InvalidHeader(arg.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_missing_fields() {
        let cfg: ClientConfig =
            serde_json::from_str(r#"{ "urls": ["http://registry/descriptors"] }"#).unwrap();
        assert_eq!(cfg, ClientConfig::new(["http://registry/descriptors"]));
        assert_eq!(cfg.interval(), Duration::from_secs(3600));
        assert!(!cfg.auto_refresh);
        assert_eq!(cfg.http.timeout_ms, 10_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn full_config_parses() {
        let cfg: ClientConfig = serde_json::from_str(
            r#"{
                "urls": ["http://a", "http://b"],
                "interval_secs": 60,
                "auto_refresh": true,
                "merge_mode": "replace",
                "refresh_strategy": "version_based",
                "java_class_names": true,
                "http": { "timeout_ms": 2500, "headers": [["Authorization", "Bearer t"]] }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.merge_mode, MergeMode::Replace);
        assert_eq!(cfg.refresh_strategy, RefreshStrategy::VersionBased);
        assert_eq!(cfg.sources()[1], Source::with_mode("http://b", MergeMode::Replace));
        assert_eq!(cfg.fetcher_config().timeout, Duration::from_millis(2500));
        assert_eq!(cfg.fetcher_config().headers[0].0, "Authorization");
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert_eq!(
            ClientConfig::new(Vec::<String>::new()).validate(),
            Err(ConfigError::NoSources)
        );
        let mut cfg = ClientConfig::new(["http://a"]);
        cfg.interval_secs = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroInterval));

        let mut cfg = ClientConfig::new(["http://a"]);
        cfg.http.headers.push(("bad name".into(), "v".into()));
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidHeader(_))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let res: Result<ClientConfig, _> =
            serde_json::from_str(r#"{ "urls": ["http://a"], "intervl": 5 }"#);
        assert!(res.is_err());
    }

    #[test]
    fn header_argument_parsing() {
        assert_eq!(
            parse_header("X-Token = abc").unwrap(),
            ("X-Token".to_string(), "abc".to_string())
        );
        assert!(parse_header("novalue").is_err());
        assert!(parse_header("=abc").is_err());
    }
}

//! Deployment configuration, loaded from a JSON file.
//!
//! Every field has a default matching the vehicle-tracker deployment, so an
//! empty object (`{}`) is a complete config:
//!
//! ```json
//! {
//!   "version": "vehicle-tracker-v1",
//!   "assets": ["/static/custom.css", "/static/manifest.json"],
//!   "policy": { "mode": "scoped", "prefix": "/static/" },
//!   "upstream": "http://127.0.0.1:5000",
//!   "listen": "127.0.0.1:8080",
//!   "storage": { "kind": "disk", "path": "/var/cache/offcache" }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{CacheStorage, DiskStorage, MemoryStorage};
use crate::http::{Locator, LocatorError, Origin};
use crate::worker::{InterceptPolicy, WorkerSettings};

/// Environment variable naming the config file when no path is given.
pub const CONFIG_ENV: &str = "OFFCACHE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("version stamp must not be empty")]
    EmptyVersion,

    #[error("scoped policy prefix must not be empty")]
    EmptyPrefix,

    #[error("invalid upstream {value:?}: {source}")]
    Upstream {
        value: String,
        #[source]
        source: LocatorError,
    },

    #[error("invalid asset locator {value:?}: {source}")]
    Asset {
        value: String,
        #[source]
        source: LocatorError,
    },
}

/// Where buckets are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    #[default]
    Memory,
    Disk { path: PathBuf },
}

impl StorageConfig {
    /// Instantiates the configured store.
    pub fn build(&self) -> Arc<dyn CacheStorage> {
        match self {
            Self::Memory => Arc::new(MemoryStorage::new()),
            Self::Disk { path } => Arc::new(DiskStorage::new(path.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Version stamp; bump it to invalidate every cached asset.
    pub version: String,
    /// Ordered locators pre-cached at install time.
    pub assets: Vec<String>,
    pub policy: InterceptPolicy,
    /// Origin of the web application behind the proxy.
    pub upstream: String,
    /// Address the proxy listens on.
    pub listen: String,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "vehicle-tracker-v1".to_owned(),
            assets: [
                "/static/custom.css",
                "/static/manifest.json",
                "/static/icons/icon-left-192.png",
                "/static/icons/icon-left-512.png",
                "/static/icons/icon-right-192.png",
                "/static/icons/icon-right-512.png",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            policy: InterceptPolicy::default(),
            upstream: "http://127.0.0.1:5000".to_owned(),
            listen: "127.0.0.1:8080".to_owned(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Parses and validates a JSON config document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Resolves the config from an explicit path, else `$OFFCACHE_CONFIG`,
    /// else the built-in defaults.
    pub fn discover(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        match path.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from)) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::EmptyVersion);
        }
        if let InterceptPolicy::Scoped { prefix } = &self.policy {
            if prefix.is_empty() {
                return Err(ConfigError::EmptyPrefix);
            }
        }
        self.upstream_origin()?;
        for asset in &self.assets {
            asset
                .parse::<Locator>()
                .map_err(|source| ConfigError::Asset {
                    value: asset.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    pub fn upstream_origin(&self) -> Result<Origin, ConfigError> {
        self.upstream
            .parse()
            .map_err(|source| ConfigError::Upstream {
                value: self.upstream.clone(),
                source,
            })
    }

    /// The worker settings this config describes.
    pub fn worker_settings(&self) -> Result<WorkerSettings, ConfigError> {
        Ok(WorkerSettings {
            version: self.version.clone(),
            assets: self.assets.clone(),
            policy: self.policy.clone(),
            home: self.upstream_origin()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_the_default_deployment() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.assets.len(), 6);
        assert_eq!(config.policy, InterceptPolicy::scoped("/static/"));
        assert_eq!(config.storage, StorageConfig::Memory);
    }

    #[test]
    fn full_document() {
        let config = Config::from_json(
            r#"{
                "version": "vehicle-tracker-v2",
                "assets": ["/static/custom.css", "http://cdn.example.com/bootstrap.css"],
                "policy": { "mode": "global" },
                "upstream": "http://10.0.0.5:5000",
                "listen": "0.0.0.0:80",
                "storage": { "kind": "disk", "path": "/tmp/offcache" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.policy, InterceptPolicy::Global);
        assert_eq!(
            config.storage,
            StorageConfig::Disk {
                path: PathBuf::from("/tmp/offcache")
            }
        );
        let settings = config.worker_settings().unwrap();
        assert_eq!(settings.home.port(), 5000);
        assert_eq!(settings.assets.len(), 2);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            Config::from_json(r#"{"version": "  "}"#),
            Err(ConfigError::EmptyVersion)
        ));
        assert!(matches!(
            Config::from_json(r#"{"policy": {"mode": "scoped", "prefix": ""}}"#),
            Err(ConfigError::EmptyPrefix)
        ));
        assert!(matches!(
            Config::from_json(r#"{"upstream": "/not-an-origin"}"#),
            Err(ConfigError::Upstream { .. })
        ));
        assert!(matches!(
            Config::from_json(r#"{"assets": ["custom.css"]}"#),
            Err(ConfigError::Asset { .. })
        ));
        assert!(matches!(
            Config::from_json(r#"{"verison": "typo"}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

//! syncd.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::parse_duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncdConfig {
    pub store: Option<StoreConfig>,
    pub api: Option<ApiConfig>,
    pub reconciler: Option<ReconcilerConfig>,
    pub objects: Option<ObjectsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: Option<u16>,
    /// Base URL under which virtual workspace URLs are published.
    pub external_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    pub poll_interval: Option<String>,
    pub heartbeat_threshold: Option<String>,
    pub backoff_base: Option<String>,
    pub backoff_max: Option<String>,
    pub max_conflict_retries: Option<u32>,
    pub escalation_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectsConfig {
    pub poll_interval: Option<String>,
}

/// Fully-defaulted reconciler settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerSettings {
    pub poll_interval: Duration,
    pub heartbeat_threshold: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_conflict_retries: u32,
    pub escalation_attempts: u32,
    pub external_url: String,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            heartbeat_threshold: Duration::from_secs(60),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            max_conflict_retries: 5,
            escalation_attempts: 3,
            external_url: "https://localhost:8443".to_string(),
        }
    }
}

const DEFAULT_PORT: u16 = 8443;

impl SyncdConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SyncdConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn port(&self) -> u16 {
        self.api.as_ref().and_then(|a| a.port).unwrap_or(DEFAULT_PORT)
    }

    /// Store path, or `<data_dir>/syncgrid.redb` when unset.
    pub fn store_path(&self, data_dir: &Path) -> PathBuf {
        self.store
            .as_ref()
            .and_then(|s| s.path.clone())
            .unwrap_or_else(|| data_dir.join("syncgrid.redb"))
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        let defaults = ReconcilerSettings::default();
        let external_url = self
            .api
            .as_ref()
            .and_then(|a| a.external_url.clone())
            .unwrap_or(defaults.external_url.clone());

        let Some(cfg) = &self.reconciler else {
            return ReconcilerSettings {
                external_url,
                ..defaults
            };
        };

        ReconcilerSettings {
            poll_interval: duration_or(&cfg.poll_interval, defaults.poll_interval),
            heartbeat_threshold: duration_or(&cfg.heartbeat_threshold, defaults.heartbeat_threshold),
            backoff_base: duration_or(&cfg.backoff_base, defaults.backoff_base),
            backoff_max: duration_or(&cfg.backoff_max, defaults.backoff_max),
            max_conflict_retries: cfg.max_conflict_retries.unwrap_or(defaults.max_conflict_retries),
            escalation_attempts: cfg.escalation_attempts.unwrap_or(defaults.escalation_attempts),
            external_url,
        }
    }

    pub fn object_poll_interval(&self) -> Duration {
        duration_or(
            &self.objects.as_ref().and_then(|o| o.poll_interval.clone()),
            Duration::from_secs(10),
        )
    }
}

fn duration_or(value: &Option<String>, fallback: Duration) -> Duration {
    value.as_deref().and_then(parse_duration).unwrap_or(fallback)
}

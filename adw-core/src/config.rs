//! Layered TOML configuration: a base [`Config`] plus an optional
//! [`ConfigLayer`] read from `adw.toml` (repo root) that overrides
//! individual fields, mirroring the teacher's settings/override-layer
//! split and its `parse()`/`as_str()`/`Display`/`FromStr` enum idiom.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    Github,
}

impl TrackerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackerKind::Github => "github",
        }
    }
}

impl fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackerKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "github" => Ok(TrackerKind::Github),
            other => Err(ConfigError::UnknownTrackerKind(other.to_string())),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read(std::io::Error),
    Parse(toml::de::Error),
    UnknownTrackerKind(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(e) => write!(f, "failed to read config file: {e}"),
            ConfigError::Parse(e) => write!(f, "failed to parse config file: {e}"),
            ConfigError::UnknownTrackerKind(name) => write!(f, "unknown tracker kind `{name}`"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Per-million-token USD rates, carried as configuration rather than
/// computed in the core so a deployment can keep its own numbers
/// current. Only consulted by the opt-in `adw token-report` command —
/// `TokenUsageEvent` parsing itself never computes cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_read_per_million: f64,
    pub cache_write_per_million: f64,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            input_per_million: 3.00,
            output_per_million: 15.00,
            cache_read_per_million: 0.30,
            cache_write_per_million: 3.75,
        }
    }
}

impl PricingTable {
    /// Dollar cost of one event's token counts, at these rates.
    pub fn cost_usd(&self, input: u64, output: u64, cache_read: u64, cache_write: u64) -> f64 {
        (input as f64 * self.input_per_million / 1_000_000.0)
            + (output as f64 * self.output_per_million / 1_000_000.0)
            + (cache_read as f64 * self.cache_read_per_million / 1_000_000.0)
            + (cache_write as f64 * self.cache_write_per_million / 1_000_000.0)
    }
}

/// Resolved configuration the dispatcher and CLI run with.
#[derive(Debug, Clone)]
pub struct Config {
    pub poll_seconds: u64,
    pub trigger_token: String,
    pub worker_id: String,
    pub tracker: TrackerKind,
    pub repo: String,
    pub phase_timeout_seconds: u64,
    pub resource_retry_limit: u32,
    pub scripts_dir: std::path::PathBuf,
    pub index_binary: Option<String>,
    pub pricing: PricingTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_seconds: 20,
            trigger_token: "adw".to_string(),
            worker_id: default_worker_id(),
            tracker: TrackerKind::Github,
            repo: String::new(),
            phase_timeout_seconds: 45 * 60,
            resource_retry_limit: 5,
            scripts_dir: std::path::PathBuf::from("adw-phases"),
            index_binary: None,
            pricing: PricingTable::default(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_seconds)
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_seconds)
    }

    /// Load from `adw.toml` next to `repo_path`, if present, applied
    /// over [`Config::default`].
    pub fn load(repo_path: &Path) -> Result<Self, ConfigError> {
        let mut config = Config {
            repo: repo_path.display().to_string(),
            ..Config::default()
        };
        let layer_path = repo_path.join("adw.toml");
        if layer_path.exists() {
            let layer = ConfigLayer::read(&layer_path)?;
            layer.apply_to(&mut config);
        }
        Ok(config)
    }
}

fn default_worker_id() -> String {
    format!("worker-{}", std::process::id())
}

/// Sparse override layer read from TOML; every field is optional so a
/// config file only needs to name what it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigLayer {
    pub poll_seconds: Option<u64>,
    pub trigger_token: Option<String>,
    pub worker_id: Option<String>,
    pub tracker: Option<String>,
    pub phase_timeout_seconds: Option<u64>,
    pub resource_retry_limit: Option<u32>,
    pub scripts_dir: Option<std::path::PathBuf>,
    pub index_binary: Option<String>,
    pub pricing: Option<PricingTable>,
}

impl ConfigLayer {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        toml::from_str(&body).map_err(ConfigError::Parse)
    }

    pub fn is_empty(&self) -> bool {
        self.poll_seconds.is_none()
            && self.trigger_token.is_none()
            && self.worker_id.is_none()
            && self.tracker.is_none()
            && self.phase_timeout_seconds.is_none()
            && self.resource_retry_limit.is_none()
            && self.scripts_dir.is_none()
            && self.index_binary.is_none()
            && self.pricing.is_none()
    }

    /// Apply this layer's present fields onto `config`; unset fields
    /// leave `config`'s existing value untouched. Returns the first
    /// parse error encountered for an invalid enum-valued field, if
    /// any — callers are expected to surface this before starting the
    /// dispatcher.
    pub fn apply_to(&self, config: &mut Config) -> Option<ConfigError> {
        if let Some(v) = self.poll_seconds {
            config.poll_seconds = v;
        }
        if let Some(v) = &self.trigger_token {
            config.trigger_token = v.clone();
        }
        if let Some(v) = &self.worker_id {
            config.worker_id = v.clone();
        }
        if let Some(v) = &self.tracker {
            match TrackerKind::from_str(v) {
                Ok(kind) => config.tracker = kind,
                Err(err) => return Some(err),
            }
        }
        if let Some(v) = self.phase_timeout_seconds {
            config.phase_timeout_seconds = v;
        }
        if let Some(v) = self.resource_retry_limit {
            config.resource_retry_limit = v;
        }
        if let Some(v) = &self.scripts_dir {
            config.scripts_dir = v.clone();
        }
        if let Some(v) = &self.index_binary {
            config.index_binary = Some(v.clone());
        }
        if let Some(v) = self.pricing {
            config.pricing = v;
        }
        None
    }

    /// Merge `other` over `self`, preferring `other`'s fields wherever
    /// present. Used when a CLI-flag layer should win over a file
    /// layer.
    pub fn merge(self, other: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            poll_seconds: other.poll_seconds.or(self.poll_seconds),
            trigger_token: other.trigger_token.or(self.trigger_token),
            worker_id: other.worker_id.or(self.worker_id),
            tracker: other.tracker.or(self.tracker),
            phase_timeout_seconds: other.phase_timeout_seconds.or(self.phase_timeout_seconds),
            resource_retry_limit: other.resource_retry_limit.or(self.resource_retry_limit),
            scripts_dir: other.scripts_dir.or(self.scripts_dir),
            index_binary: other.index_binary.or(self.index_binary),
            pricing: other.pricing.or(self.pricing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_kind_round_trips_through_display_and_from_str() {
        assert_eq!(TrackerKind::Github.to_string(), "github");
        assert_eq!(TrackerKind::from_str("github").unwrap(), TrackerKind::Github);
        assert!(TrackerKind::from_str("jira").is_err());
    }

    #[test]
    fn empty_layer_leaves_defaults_untouched() {
        let mut config = Config::default();
        let default_poll = config.poll_seconds;
        let layer = ConfigLayer::default();
        assert!(layer.is_empty());
        assert!(layer.apply_to(&mut config).is_none());
        assert_eq!(config.poll_seconds, default_poll);
    }

    #[test]
    fn layer_overrides_only_named_fields() {
        let mut config = Config::default();
        let layer = ConfigLayer {
            poll_seconds: Some(5),
            ..ConfigLayer::default()
        };
        assert!(!layer.is_empty());
        assert!(layer.apply_to(&mut config).is_none());
        assert_eq!(config.poll_seconds, 5);
        assert_eq!(config.trigger_token, "adw");
    }

    #[test]
    fn cli_layer_wins_over_file_layer_on_merge() {
        let file_layer = ConfigLayer {
            poll_seconds: Some(10),
            trigger_token: Some("file".into()),
            ..ConfigLayer::default()
        };
        let cli_layer = ConfigLayer {
            poll_seconds: Some(30),
            ..ConfigLayer::default()
        };
        let merged = file_layer.merge(cli_layer);
        assert_eq!(merged.poll_seconds, Some(30));
        assert_eq!(merged.trigger_token, Some("file".into()));
    }

    #[test]
    fn pricing_table_computes_cost_at_default_rates() {
        let pricing = PricingTable::default();
        let cost = pricing.cost_usd(1_000_000, 1_000_000, 0, 0);
        assert!((cost - 18.00).abs() < 1e-9);
    }
}

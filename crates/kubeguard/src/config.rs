use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use decision_engine::EngineConfig;
use policy_engine::LoadLimits;
use runtime_detect::EvaluatorConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_rules_file")]
    pub rules_file: PathBuf,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rules_file: default_rules_file(),
            network: NetworkConfig::default(),
            logging: LoggingConfig::default(),
            engine: EngineSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen")]
    pub listen_addr: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_audit_path")]
    pub audit_log_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            audit_log_path: default_audit_path(),
        }
    }
}

/// Sizing and timing knobs for evaluation.
#[derive(Debug, Deserialize)]
pub struct EngineSettings {
    /// Number of ordered event lanes.
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    #[serde(default = "default_lane_capacity")]
    pub lane_capacity: usize,
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: usize,
    #[serde(default = "default_correlation_shards")]
    pub correlation_shards: usize,
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    #[serde(default = "default_max_window_secs")]
    pub max_window_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_admission_timeout_ms")]
    pub admission_timeout_ms: u64,
    /// Events stamped further ahead of the local clock are dropped.
    #[serde(default = "default_max_future_skew_secs")]
    pub max_future_skew_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lanes: default_lanes(),
            lane_capacity: default_lane_capacity(),
            max_tracked_keys: default_max_tracked_keys(),
            correlation_shards: default_correlation_shards(),
            grace_secs: default_grace_secs(),
            max_window_secs: default_max_window_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            admission_timeout_ms: default_admission_timeout_ms(),
            max_future_skew_secs: default_max_future_skew_secs(),
        }
    }
}

impl EngineSettings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            limits: LoadLimits {
                max_window_secs: self.max_window_secs,
            },
            evaluator: EvaluatorConfig {
                max_tracked_keys: self.max_tracked_keys,
                shards: self.correlation_shards,
                grace: seconds(self.grace_secs),
                max_future_skew: seconds(self.max_future_skew_secs),
                ..EvaluatorConfig::default()
            },
        }
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Saturates at the largest span chrono can represent.
fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min((i64::MAX / 1_000) as u64) as i64)
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_rules_file() -> PathBuf {
    PathBuf::from("rules.yaml")
}

fn default_listen() -> String {
    "127.0.0.1:8443".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("audit.jsonl")
}

fn default_lanes() -> usize {
    8
}

fn default_lane_capacity() -> usize {
    1024
}

fn default_max_tracked_keys() -> usize {
    65_536
}

fn default_correlation_shards() -> usize {
    16
}

fn default_grace_secs() -> u64 {
    30
}

fn default_max_window_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    10
}

fn default_admission_timeout_ms() -> u64 {
    500
}

fn default_max_future_skew_secs() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file.
///
/// A missing file yields the default configuration and a warning.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config: Config = serde_yml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    Ok(config)
}

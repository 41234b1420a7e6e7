use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_sample_interval", with = "human_duration")]
    pub sample_interval: Duration,
    #[serde(default = "default_report_interval", with = "human_duration")]
    pub report_interval: Duration,
    #[serde(default = "default_sample_timeout", with = "human_duration")]
    pub sample_timeout: Duration,
    #[serde(default = "default_subscriber_timeout", with = "human_duration")]
    pub subscriber_timeout: Duration,
    #[serde(default = "default_shutdown_grace", with = "human_duration")]
    pub shutdown_grace: Duration,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_ranking_keys")]
    pub ranking_keys: Vec<RankKey>,
    #[serde(default)]
    pub noise_floor: NoiseFloor,
    #[serde(default)]
    pub alerts: AlertThresholds,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default)]
    pub persist_samples: bool,
    #[serde(default)]
    pub sinks: SinksConfig,
    #[serde(default = "default_sink_queue_capacity")]
    pub sink_queue_capacity: usize,
    #[serde(default = "default_subscriber_queue_capacity")]
    pub subscriber_queue_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankKey {
    Cpu,
    Memory,
}

/// Processes below both floors are idle and never ranked.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct NoiseFloor {
    #[serde(default = "default_floor_cpu_percent")]
    pub cpu_percent: f64,
    #[serde(default = "default_floor_memory_percent")]
    pub memory_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct AlertThresholds {
    #[serde(default = "default_alert_cpu_percent")]
    pub cpu_percent: f64,
    #[serde(default = "default_alert_memory_percent")]
    pub memory_percent: f64,
    #[serde(default = "default_alert_swap_percent")]
    pub swap_percent: f64,
    #[serde(default = "default_alert_temperature_c")]
    pub temperature_c: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinksConfig {
    #[serde(default = "default_true")]
    pub log: bool,
    #[serde(default = "default_true")]
    pub csv: bool,
    #[serde(default = "default_true")]
    pub json: bool,
    #[serde(default = "default_true")]
    pub history: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            sample_interval: default_sample_interval(),
            report_interval: default_report_interval(),
            sample_timeout: default_sample_timeout(),
            subscriber_timeout: default_subscriber_timeout(),
            shutdown_grace: default_shutdown_grace(),
            log_dir: default_log_dir(),
            file_prefix: default_file_prefix(),
            top_n: default_top_n(),
            ranking_keys: default_ranking_keys(),
            noise_floor: NoiseFloor::default(),
            alerts: AlertThresholds::default(),
            history_capacity: default_history_capacity(),
            persist_samples: false,
            sinks: SinksConfig::default(),
            sink_queue_capacity: default_sink_queue_capacity(),
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
        }
    }
}

impl Default for NoiseFloor {
    fn default() -> Self {
        Self {
            cpu_percent: default_floor_cpu_percent(),
            memory_percent: default_floor_memory_percent(),
        }
    }
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: default_alert_cpu_percent(),
            memory_percent: default_alert_memory_percent(),
            swap_percent: default_alert_swap_percent(),
            temperature_c: default_alert_temperature_c(),
        }
    }
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            log: true,
            csv: true,
            json: true,
            history: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.sample_interval.is_zero() {
            return Err(ConfigError::Validation(
                "sample_interval must be > 0".to_string(),
            ));
        }
        if self.report_interval < self.sample_interval {
            return Err(ConfigError::Validation(
                "report_interval must be >= sample_interval".to_string(),
            ));
        }
        if self.sample_timeout.is_zero() || self.subscriber_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "sample_timeout and subscriber_timeout must be > 0".to_string(),
            ));
        }
        if self.log_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "log_dir must not be empty".to_string(),
            ));
        }
        if self.file_prefix.trim().is_empty() || self.file_prefix.contains(['/', '\\']) {
            return Err(ConfigError::Validation(
                "file_prefix must be a non-empty file name".to_string(),
            ));
        }
        if self.top_n == 0 {
            return Err(ConfigError::Validation("top_n must be >= 1".to_string()));
        }
        if self.ranking_keys.is_empty() {
            return Err(ConfigError::Validation(
                "ranking_keys must name at least one of cpu, memory".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Validation(
                "history_capacity must be >= 1".to_string(),
            ));
        }
        if self.sink_queue_capacity == 0 || self.subscriber_queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "queue capacities must be >= 1".to_string(),
            ));
        }
        if self.noise_floor.cpu_percent < 0.0 || self.noise_floor.memory_percent < 0.0 {
            return Err(ConfigError::Validation(
                "noise_floor values must be >= 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

mod human_duration {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
    }
}

fn default_listen() -> String {
    "127.0.0.1:8765".to_string()
}

const fn default_sample_interval() -> Duration {
    Duration::from_secs(2)
}

const fn default_report_interval() -> Duration {
    Duration::from_secs(60)
}

const fn default_sample_timeout() -> Duration {
    Duration::from_secs(2)
}

const fn default_subscriber_timeout() -> Duration {
    Duration::from_secs(2)
}

const fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/system_monitor")
}

fn default_file_prefix() -> String {
    "system_monitor".to_string()
}

const fn default_top_n() -> usize {
    5
}

fn default_ranking_keys() -> Vec<RankKey> {
    vec![RankKey::Cpu, RankKey::Memory]
}

const fn default_floor_cpu_percent() -> f64 {
    0.1
}

const fn default_floor_memory_percent() -> f64 {
    1.0
}

const fn default_alert_cpu_percent() -> f64 {
    90.0
}

const fn default_alert_memory_percent() -> f64 {
    90.0
}

const fn default_alert_swap_percent() -> f64 {
    50.0
}

const fn default_alert_temperature_c() -> f64 {
    80.0
}

const fn default_history_capacity() -> usize {
    1000
}

const fn default_sink_queue_capacity() -> usize {
    64
}

const fn default_subscriber_queue_capacity() -> usize {
    16
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_parses_and_validates() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("example parses");
        cfg.validate().expect("example is valid");
        assert_eq!(cfg.sample_interval, Duration::from_secs(2));
        assert_eq!(cfg.report_interval, Duration::from_secs(60));
        assert_eq!(cfg.ranking_keys, vec![RankKey::Cpu, RankKey::Memory]);
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").expect("empty mapping parses");
        assert_eq!(cfg.top_n, 5);
        assert_eq!(cfg.history_capacity, 1000);
        assert_eq!(cfg.noise_floor, NoiseFloor::default());
        assert!(cfg.sinks.csv);
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn human_readable_durations() {
        let cfg: Config =
            serde_yaml::from_str("sample_interval: 500ms\nreport_interval: 1m\n").unwrap();
        assert_eq!(cfg.sample_interval, Duration::from_millis(500));
        assert_eq!(cfg.report_interval, Duration::from_secs(60));
    }

    #[test]
    fn report_interval_shorter_than_sample_interval_is_rejected() {
        let cfg = Config {
            sample_interval: Duration::from_secs(10),
            report_interval: Duration::from_secs(5),
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn zero_sample_interval_is_rejected() {
        let cfg = Config {
            sample_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_ranking_keys_are_rejected() {
        let cfg = Config {
            ranking_keys: vec![],
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn invalid_listen_is_rejected() {
        let cfg = Config {
            listen: "not-an-address".to_string(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }
}

//! Configuration management for the health monitor

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::errors::Result;

pub const DEFAULT_CONFIG_PATH: &str = "/app/config/monitor_config.yml";
pub const DEFAULT_CONTAINER_TEMPLATE: &str = "sre-demo_{service}_1";

/// A named HTTP endpoint probed on every tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Unique name, also used as the service name for remediation
    pub name: String,

    /// Health endpoint URL
    pub url: String,

    /// Per-probe timeout, written in seconds
    #[serde(with = "duration_secs", default = "default_target_timeout")]
    pub timeout: Duration,

    /// Status code a healthy response must carry
    #[serde(alias = "expectedStatus", default = "default_expected_status")]
    pub expected_status: u16,
}

impl Target {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            timeout: default_target_timeout(),
            expected_status: default_expected_status(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_expected_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Back-to-back failures before a target escalates
    #[serde(alias = "consecutiveFailures", default = "default_consecutive_failures")]
    pub consecutive_failures: u32,

    /// Response time above which a warning is raised
    #[serde(alias = "responseTimeMs", default = "default_response_time_ms")]
    pub response_time_ms: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            consecutive_failures: default_consecutive_failures(),
            response_time_ms: default_response_time_ms(),
        }
    }
}

/// Remediation policy. A config file without this section disables remediation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(alias = "restartService", default)]
    pub restart_service: bool,

    /// Container name pattern; `{service}` is replaced by the target name
    #[serde(alias = "containerTemplate", default = "default_container_template")]
    pub container_template: String,

    /// Minimum seconds between two restarts of the same target, 0 disables
    #[serde(alias = "cooldownSeconds", default)]
    pub cooldown_seconds: u64,

    /// Log restarts instead of driving the container runtime
    #[serde(alias = "dryRun", default)]
    pub dry_run: bool,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            restart_service: false,
            container_template: default_container_template(),
            cooldown_seconds: 0,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// JSON-lines file every alert is appended to
    #[serde(alias = "logFile", default)]
    pub log_file: Option<String>,

    /// Alerts kept in memory for the recent-alerts query
    #[serde(alias = "historyCapacity", default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            history_capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Latency samples kept per target
    #[serde(alias = "windowCapacity", default = "default_window_capacity")]
    pub window_capacity: usize,

    /// System snapshots kept in memory
    #[serde(alias = "systemHistoryCapacity", default = "default_window_capacity")]
    pub system_history_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            system_history_capacity: default_window_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Targets in probe order
    #[serde(default)]
    pub targets: Vec<Target>,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default)]
    pub remediation: RemediationConfig,

    #[serde(default)]
    pub alerts: AlertConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Seconds between health-check ticks
    #[serde(alias = "checkIntervalSeconds", default = "default_check_interval")]
    pub check_interval_seconds: u64,

    /// Seconds between system metrics samples
    #[serde(alias = "metricsIntervalSeconds", default = "default_metrics_interval")]
    pub metrics_interval_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            targets: vec![Target::new("webapp", "http://webapp:5000/health")],
            thresholds: Thresholds::default(),
            remediation: RemediationConfig {
                enabled: true,
                restart_service: true,
                ..RemediationConfig::default()
            },
            alerts: AlertConfig::default(),
            metrics: MetricsConfig::default(),
            check_interval_seconds: default_check_interval(),
            metrics_interval_seconds: default_metrics_interval(),
        }
    }
}

impl Config {
    /// Parse a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Load the config file, falling back to defaults when it is missing or malformed
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_yaml(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    error!("Invalid config file {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file not found: {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                error!("Failed to read config file {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load the config file, then apply environment overrides
    pub fn from_sources(path: impl AsRef<Path>) -> Self {
        let mut config = Self::load(path);
        config.apply_env();
        config
    }

    /// Apply `CHECK_INTERVAL`, `METRICS_INTERVAL` and `ALERT_LOG_PATH`
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(interval) = lookup("CHECK_INTERVAL") {
            match interval.trim().parse() {
                Ok(seconds) => self.check_interval_seconds = seconds,
                Err(_) => warn!("Ignoring invalid CHECK_INTERVAL: {}", interval),
            }
        }

        if let Some(interval) = lookup("METRICS_INTERVAL") {
            match interval.trim().parse() {
                Ok(seconds) => self.metrics_interval_seconds = seconds,
                Err(_) => warn!("Ignoring invalid METRICS_INTERVAL: {}", interval),
            }
        }

        if let Some(path) = lookup("ALERT_LOG_PATH") {
            if !path.trim().is_empty() {
                self.alerts.log_file = Some(path.trim().to_string());
            }
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_seconds)
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.targets.is_empty() {
            return Err("at least one target must be configured".to_string());
        }

        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err("target name cannot be empty".to_string());
            }

            if !names.insert(target.name.as_str()) {
                return Err(format!("duplicate target name: {}", target.name));
            }

            if target.url.trim().is_empty() {
                return Err(format!("target {} has an empty url", target.name));
            }

            if target.timeout.is_zero() {
                return Err(format!("target {} timeout must be greater than 0", target.name));
            }
        }

        if self.thresholds.consecutive_failures == 0 {
            return Err("consecutive_failures must be greater than 0".to_string());
        }

        let response_time_ms = self.thresholds.response_time_ms;
        if response_time_ms.is_nan() || response_time_ms <= 0.0 {
            return Err("response_time_ms must be greater than 0".to_string());
        }

        if self.check_interval_seconds == 0 {
            return Err("check interval must be greater than 0".to_string());
        }

        if self.metrics_interval_seconds == 0 {
            return Err("metrics interval must be greater than 0".to_string());
        }

        if self.alerts.history_capacity == 0 {
            return Err("alert history_capacity must be greater than 0".to_string());
        }

        if self.metrics.window_capacity == 0 || self.metrics.system_history_capacity == 0 {
            return Err("metrics capacities must be greater than 0".to_string());
        }

        if !self.remediation.container_template.contains("{service}") {
            warn!(
                "Container template {} has no {{service}} placeholder, every target restarts the same container",
                self.remediation.container_template
            );
        }

        Ok(())
    }
}

fn default_target_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_expected_status() -> u16 {
    200
}

fn default_consecutive_failures() -> u32 {
    3
}

fn default_response_time_ms() -> f64 {
    5000.0
}

fn default_container_template() -> String {
    DEFAULT_CONTAINER_TEMPLATE.to_string()
}

fn default_history_capacity() -> usize {
    1000
}

fn default_window_capacity() -> usize {
    100
}

fn default_check_interval() -> u64 {
    30
}

fn default_metrics_interval() -> u64 {
    60
}

/// Durations written as (possibly fractional) seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.targets.len(), 1);
        assert_eq!(config.targets[0].name, "webapp");
        assert_eq!(config.targets[0].expected_status, 200);
        assert_eq!(config.targets[0].timeout, Duration::from_secs(5));
        assert_eq!(config.thresholds.consecutive_failures, 3);
        assert_eq!(config.check_interval_seconds, 30);
        assert_eq!(config.metrics_interval_seconds, 60);
        assert!(config.remediation.enabled);
        assert!(config.remediation.restart_service);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
targets:
  - name: api
    url: http://api:8080/health
    timeout: 2
    expected_status: 204
  - name: worker
    url: http://worker:9000/health
    timeout: 0.5
thresholds:
  consecutive_failures: 5
  response_time_ms: 250
remediation:
  enabled: true
  restart_service: false
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].expected_status, 204);
        assert_eq!(config.targets[1].timeout, Duration::from_millis(500));
        assert_eq!(config.targets[1].expected_status, 200);
        assert_eq!(config.thresholds.consecutive_failures, 5);
        assert_eq!(config.thresholds.response_time_ms, 250.0);
        assert!(config.remediation.enabled);
        assert!(!config.remediation.restart_service);
        assert_eq!(config.remediation.container_template, DEFAULT_CONTAINER_TEMPLATE);
    }

    #[test]
    fn test_parse_camel_case_aliases() {
        let yaml = r#"
targets:
  - name: api
    url: http://api/health
    expectedStatus: 201
thresholds:
  consecutiveFailures: 2
  responseTimeMs: 100
remediation:
  enabled: true
  restartService: true
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.targets[0].expected_status, 201);
        assert_eq!(config.thresholds.consecutive_failures, 2);
        assert!(config.remediation.restart_service);
    }

    #[test]
    fn test_missing_remediation_section_disables_it() {
        let yaml = "targets:\n  - name: api\n    url: http://api/health\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert!(!config.remediation.enabled);
        assert!(!config.remediation.restart_service);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.yml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_malformed_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "targets: [this is: not valid").unwrap();

        let config = Config::load(file.path());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "targets:\n  - name: db\n    url: http://db/health\n    timeout: 1").unwrap();

        let config = Config::load(file.path());
        assert_eq!(config.targets[0].name, "db");
        assert_eq!(config.targets[0].timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CHECK_INTERVAL", "10"),
            ("METRICS_INTERVAL", "not-a-number"),
            ("ALERT_LOG_PATH", "/tmp/alerts.log"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.check_interval(), Duration::from_secs(10));
        assert_eq!(config.metrics_interval(), Duration::from_secs(60));
        assert_eq!(config.alerts.log_file.as_deref(), Some("/tmp/alerts.log"));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.targets.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.targets.push(Target::new("webapp", "http://other/health"));
        assert!(config.validate().unwrap_err().contains("duplicate"));

        let mut config = Config::default();
        config.thresholds.consecutive_failures = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.targets[0].timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.check_interval_seconds = 0;
        assert!(config.validate().is_err());
    }
}

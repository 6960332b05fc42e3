//! Monitor configuration structs and defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::HotSwapPolicy;
use crate::channel::ShellSettings;
use crate::hardware::Timings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    #[serde(rename = "crate")]
    pub crate_settings: CrateSettings,
    pub ipmitool: IpmitoolSettings,
    pub timing: TimingSettings,
    pub hot_swap: HotSwapPolicy,
    pub logging: LoggingSettings,
}

/// Crate address and credentials. Reads refuse to run until all three are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrateSettings {
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub auth_type: Option<String>, // -A, e.g. "NONE"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpmitoolSettings {
    pub path: Option<String>,
    pub interface: Option<String>,
    pub command_timeout_secs: f64,
}

pub fn default_interface() -> Option<String> { Some("lanplus".to_string()) }

impl Default for IpmitoolSettings {
    fn default() -> Self {
        Self {
            path: None,
            interface: default_interface(),
            command_timeout_secs: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub settle_secs: f64,
    pub teardown_grace_secs: f64,
    pub controller_warmup_secs: f64,
    pub list_retry_secs: f64,
    pub liveness_interval_secs: f64,
    pub module_reset_secs: f64,
    pub max_reset_retries: u32,
    pub poll_interval_secs: f64, // --watch only
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            settle_secs: 2.0,
            teardown_grace_secs: 2.0,
            controller_warmup_secs: 15.0,
            list_retry_secs: 1.0,
            liveness_interval_secs: 1.0,
            module_reset_secs: 2.0,
            max_reset_retries: 10,
            poll_interval_secs: 10.0,
        }
    }
}

/// Unset means `RUST_LOG`, else INFO.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: Option<String>,
}

/// Negative or non-finite values collapse to zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl TimingSettings {
    pub fn timings(&self) -> Timings {
        Timings {
            settle: secs(self.settle_secs),
            controller_warmup: secs(self.controller_warmup_secs),
            list_retry: secs(self.list_retry_secs),
            liveness_interval: secs(self.liveness_interval_secs),
            module_reset: secs(self.module_reset_secs),
            max_reset_retries: self.max_reset_retries,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        // tokio::time::interval panics on a zero period
        secs(self.poll_interval_secs).max(Duration::from_millis(100))
    }
}

impl MonitorConfig {
    pub fn shell_settings(&self) -> ShellSettings {
        ShellSettings {
            command_timeout: secs(self.ipmitool.command_timeout_secs),
            teardown_grace: secs(self.timing.teardown_grace_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let json = r#"{ "crate": { "host": "mch01" }, "timing": { "max_reset_retries": 3 } }"#;
        let config: MonitorConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.crate_settings.host.as_deref(), Some("mch01"));
        assert!(config.crate_settings.user.is_none());
        assert_eq!(config.timing.max_reset_retries, 3);
        assert_eq!(config.timing.controller_warmup_secs, 15.0);
        assert_eq!(config.ipmitool.interface.as_deref(), Some("lanplus"));
        assert_eq!(config.hot_swap.no_value_normal_status, "lnc");
    }

    #[test]
    fn test_serializes_crate_section_name() {
        let value = serde_json::to_value(MonitorConfig::default()).unwrap();
        assert!(value.get("crate").is_some());
        assert!(value.get("crate_settings").is_none());
    }

    #[test]
    fn test_timing_conversion() {
        let timing = TimingSettings { settle_secs: 0.5, list_retry_secs: -1.0, ..Default::default() };
        let timings = timing.timings();
        assert_eq!(timings.settle, Duration::from_millis(500));
        assert_eq!(timings.list_retry, Duration::ZERO);
        assert_eq!(timings.max_reset_retries, 10);
    }

    #[test]
    fn test_shell_settings() {
        let mut config = MonitorConfig::default();
        config.ipmitool.command_timeout_secs = 1.5;
        let settings = config.shell_settings();
        assert_eq!(settings.command_timeout, Duration::from_millis(1500));
        assert_eq!(settings.teardown_grace, Duration::from_secs(2));
    }
}

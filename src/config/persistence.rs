//! Config file load and save.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::types::MonitorConfig;

pub const CONFIG_FILE_NAME: &str = "mtca-monitor.json";

/// `mtca-monitor.json` next to the executable.
pub fn default_config_path() -> Result<PathBuf> {
    let exe_dir = std::env::current_exe()?
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Cannot determine executable directory"))?
        .to_path_buf();
    Ok(exe_dir.join(CONFIG_FILE_NAME))
}

pub async fn load_config(path: Option<&Path>) -> Result<MonitorConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    if !config_path.exists() {
        warn!("Config file {:?} not found, using defaults", config_path);
        return Ok(MonitorConfig::default());
    }

    let content = tokio::fs::read_to_string(&config_path)
        .await
        .with_context(|| format!("Failed to read {:?}", config_path))?;
    let config: MonitorConfig = serde_json::from_str(&content)
        .with_context(|| format!("Invalid config file {:?}", config_path))?;

    if config.crate_settings.host.is_none() {
        warn!("No crate host configured in {:?}. Pass --host or edit the file.", config_path);
    }

    info!("Loaded configuration from: {:?}", config_path);
    Ok(config)
}

pub async fn save_config(config: &MonitorConfig, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;
    info!("Configuration saved to: {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.json"))).await.unwrap();
        assert!(config.crate_settings.host.is_none());
        assert_eq!(config.timing.poll_interval_secs, 10.0);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = MonitorConfig::default();
        config.crate_settings.host = Some("mch01".to_string());
        config.crate_settings.auth_type = Some("NONE".to_string());
        config.hot_swap.normal_values.push("Handle Closed".to_string());
        save_config(&config, &path).await.unwrap();

        let loaded = load_config(Some(&path)).await.unwrap();
        assert_eq!(loaded.crate_settings.host.as_deref(), Some("mch01"));
        assert_eq!(loaded.crate_settings.auth_type.as_deref(), Some("NONE"));
        assert_eq!(loaded.hot_swap, config.hot_swap);
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ \"crate\": ").unwrap();

        let err = load_config(Some(&path)).await.unwrap_err();
        assert!(err.to_string().contains("Invalid config file"));
    }
}

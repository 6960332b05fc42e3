//! Command-line argument definitions (clap).

use std::path::PathBuf;

use clap::Parser;

use crate::catalog::BusKind;

#[derive(Parser, Debug)]
#[command(name = "mtca-monitor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MicroTCA crate monitor (ipmitool front end)", long_about = None)]
pub struct Args {
    // === Crate ===
    /// Config file (default: mtca-monitor.json next to the executable)
    #[arg(short = 'c', long, value_name = "PATH", help_heading = "Crate")]
    pub config: Option<PathBuf>,

    /// MCH host name or address (overrides the config file)
    #[arg(short = 'H', long, help_heading = "Crate")]
    pub host: Option<String>,

    /// IPMI user (overrides the config file)
    #[arg(short = 'U', long, help_heading = "Crate")]
    pub user: Option<String>,

    /// IPMI password (overrides the config file)
    #[arg(short = 'P', long, help_heading = "Crate")]
    pub password: Option<String>,

    // === Monitoring ===
    /// Scan the crate once and print modules, sensors and alarm levels
    #[arg(short = 's', long, help_heading = "Monitoring")]
    pub scan: bool,

    /// Keep scanning at the configured poll interval until Ctrl+C
    #[arg(short = 'w', long, help_heading = "Monitoring")]
    pub watch: bool,

    /// Print MCH firmware versions and uptime
    #[arg(short = 'f', long, help_heading = "Monitoring")]
    pub firmware: bool,

    /// Print state as JSON instead of text
    #[arg(long, help_heading = "Monitoring")]
    pub json: bool,

    // === Recovery ===
    /// Power-cycle the whole crate and wait for the MCH to return
    #[arg(long = "reset-crate", help_heading = "Recovery")]
    pub reset_crate: bool,

    /// Deactivate and reactivate one module (bus: pm, cu, amc, mch or a number)
    #[arg(long = "reset-module", num_args = 2, value_names = ["BUS", "SLOT"], help_heading = "Recovery")]
    pub reset_module: Option<Vec<String>>,

    // === Config & Debug ===
    /// Set log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(long = "log-level", help_heading = "Config & Debug")]
    pub log_level: Option<String>,

    /// Print the ipmitool version in use
    #[arg(long = "tool-version", help_heading = "Config & Debug")]
    pub tool_version: bool,

    /// Write the effective configuration to the config file and exit
    #[arg(long = "write-config", help_heading = "Config & Debug")]
    pub write_config: bool,
}

impl Args {
    pub fn has_action(&self) -> bool {
        self.scan
            || self.watch
            || self.firmware
            || self.reset_crate
            || self.reset_module.is_some()
            || self.tool_version
            || self.write_config
    }
}

/// Bus by name (`amc`) or number (`193`).
pub fn parse_bus(value: &str) -> Option<u8> {
    BusKind::from_name(value)
        .map(BusKind::id)
        .or_else(|| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bus() {
        assert_eq!(parse_bus("amc"), Some(193));
        assert_eq!(parse_bus("PM"), Some(10));
        assert_eq!(parse_bus("30"), Some(30));
        assert_eq!(parse_bus("fan"), None);
    }

    #[test]
    fn test_reset_module_takes_two_values() {
        let args = Args::try_parse_from(["mtca-monitor", "--reset-module", "amc", "5"]).unwrap();
        assert_eq!(args.reset_module, Some(vec!["amc".to_string(), "5".to_string()]));
        assert!(args.has_action());
    }

    #[test]
    fn test_credentials_override() {
        let args = Args::try_parse_from(["mtca-monitor", "-H", "mch01", "-U", "root", "--scan", "--json"]).unwrap();
        assert_eq!(args.host.as_deref(), Some("mch01"));
        assert_eq!(args.user.as_deref(), Some("root"));
        assert!(args.scan && args.json);
        assert!(args.password.is_none());
    }

    #[test]
    fn test_no_action() {
        let args = Args::try_parse_from(["mtca-monitor", "--log-level", "debug"]).unwrap();
        assert!(!args.has_action());
    }
}

//! Hardware data types: Sensor, timing settings, events and snapshots.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{AlarmLevel, ThresholdField};

/// Offset used to synthesize a missing non-critical limit from the
/// critical one, so the publishing side always sees four ordered limits.
pub const NO_ALARM_OFFSET: f64 = 0.01;

/// Whether a sensor's alarm thresholds are known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdState {
    /// Not queried yet.
    #[default]
    Unknown,
    /// Queried, but the module reports none (or the query failed).
    Unavailable,
    Valid,
}

/// One canonical measurement on a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub canonical_id: String,
    /// Label the module reported when the sensor was first seen.
    pub raw_label: String,
    pub value: f64,
    pub unit: String,
    pub lolo: f64,
    pub low: f64,
    pub high: f64,
    pub hihi: f64,
    pub thresholds: ThresholdState,
    /// Set by the most recent refresh only.
    pub valid: bool,
}

/// Alarm limits as handed to the publishing side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PublishedLimits {
    pub lolo: f64,
    pub low: f64,
    pub high: f64,
    pub hihi: f64,
    /// False when the limits should not raise alarms at all.
    pub active: bool,
}

impl Sensor {
    pub fn new(canonical_id: &str, raw_label: &str) -> Self {
        Self {
            canonical_id: canonical_id.to_string(),
            raw_label: raw_label.to_string(),
            value: 0.0,
            unit: String::new(),
            lolo: 0.0,
            low: 0.0,
            high: 0.0,
            hihi: 0.0,
            thresholds: ThresholdState::Unknown,
            valid: false,
        }
    }

    pub fn alarm_thresholds_loaded(&self) -> bool {
        self.thresholds != ThresholdState::Unknown
    }

    pub fn alarm_thresholds_valid(&self) -> bool {
        self.thresholds == ThresholdState::Valid
    }

    pub fn set_threshold(&mut self, field: ThresholdField, value: f64) {
        match field {
            ThresholdField::LoLo => self.lolo = value,
            ThresholdField::Low => self.low = value,
            ThresholdField::High => self.high = value,
            ThresholdField::HiHi => self.hihi = value,
        }
    }

    /// Limits for publishing. Modules often only define critical limits;
    /// the missing non-critical ones sit just inside them.
    pub fn published_limits(&self) -> PublishedLimits {
        let mut low = self.low;
        let mut high = self.high;
        if low == 0.0 && self.lolo != 0.0 {
            low = self.lolo + NO_ALARM_OFFSET;
        }
        if high == 0.0 && self.hihi != 0.0 {
            high = self.hihi - NO_ALARM_OFFSET;
        }
        PublishedLimits {
            lolo: self.lolo,
            low,
            high,
            hihi: self.hihi,
            active: self.alarm_thresholds_valid(),
        }
    }
}

/// Fixed delays and retry budgets of the crate workflows.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Wait before a crate reset so in-flight commands can finish.
    pub settle: Duration,
    /// Wait after the MCH answers again, so it can rebuild its sensor lists.
    pub controller_warmup: Duration,
    /// Delay between module-list attempts that returned nothing.
    pub list_retry: Duration,
    /// Delay between liveness checks while the crate is down.
    pub liveness_interval: Duration,
    /// Time a module is held deactivated during a module reset.
    pub module_reset: Duration,
    pub max_reset_retries: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            controller_warmup: Duration::from_secs(15),
            list_retry: Duration::from_secs(1),
            liveness_interval: Duration::from_secs(1),
            module_reset: Duration::from_secs(2),
            max_reset_retries: 10,
        }
    }
}

/// Communication status of a slot, as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommsStatus {
    Error = 0,
    Ok = 1,
    /// Nothing installed in the slot.
    None = 2,
}

/// MCH firmware banner fields; `"Unknown"` when unreadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    pub version: String,
    pub date: String,
}

impl FirmwareInfo {
    pub fn unknown() -> Self {
        Self {
            version: "Unknown".to_string(),
            date: "Unknown".to_string(),
        }
    }
}

/// Scan notifications for whoever republishes crate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrateEvent {
    ModulesPopulated,
    SensorsUpdated,
    /// Data could not be refreshed; published values are stale.
    SensorsInvalidated,
    ResetStarted,
    ResetCompleted,
    ResetFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleSnapshot {
    pub id: String,
    pub name: String,
    pub bus: u8,
    pub slot: i32,
    pub comms_ok: bool,
    pub alarm_level: AlarmLevel,
    pub sensors: Vec<Sensor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrateSnapshot {
    pub host: Option<String>,
    pub modules_initialized: bool,
    pub resetting: bool,
    pub firmware: Vec<(u8, FirmwareInfo)>,
    pub uptime_days: Option<f64>,
    pub modules: Vec<ModuleSnapshot>,
}

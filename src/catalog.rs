//! Static lookup tables that normalize vendor sensor output.
//!
//! MCH firmware from different vendors (and different revisions of the same
//! firmware) label the same physical measurement differently. Everything
//! downstream keys sensors by the canonical id returned here, never by the
//! raw label. Labels that are not in the table are ignored entirely.

use serde::{Deserialize, Serialize};

/// Canonical id of the hot-swap (ejector handle) sensor.
pub const HOT_SWAP: &str = "HOT_SWAP";

/// Sensors that resolve to discrete states rather than a floating value.
pub const DIGITAL_SENSORS: &[&str] = &[HOT_SWAP];

/// Digital value of the hot-swap sensor before it has ever been read.
pub const HOT_SWAP_N_A: f64 = 0.0;
/// Digital value of the hot-swap sensor in its normal state.
pub const HOT_SWAP_OK: f64 = 1.0;
/// Digital value of the hot-swap sensor in a fault state.
pub const HOT_SWAP_FAULT: f64 = 2.0;

/// Fixed fan thresholds (lolo, low, high, hihi) in RPM.
/// The MCH does not expose adjustable fan thresholds.
pub const FAN_THRESHOLDS: [f64; 4] = [500.0, 1000.0, 3500.0, 4000.0];

/// Raw sensor label -> canonical sensor id, collected across vendors and
/// firmware revisions.
pub const SENSOR_LABELS: &[(&str, &str)] = &[
    ("12 V PP", "12V0"),
    ("12V PP", "12V0"),
    ("12 V AMC", "12V0"),
    ("+12V PSU", "12V0"),
    ("+12V", "12V0"),
    ("PP", "12V0"),
    ("Base 12V", "12V0"),
    ("+12V_1", "12V0_1"),
    ("12VHH", "12V0_1"),
    ("+5V PSU", "5V0"),
    ("SMP", "5V0"),
    ("SMPP", "5V0_1"),
    ("3.3 V PP", "3V3"),
    ("3.3V MP", "3V3"),
    ("+3.3V PSU", "3V3"),
    ("+3.3V", "3V3"),
    ("MP", "3V3"),
    ("Base 3.3V", "3V3"),
    ("2.5 V", "2V5"),
    ("2.5V", "2V5"),
    ("Base 2.5V", "2V5"),
    ("1.8 V", "1V8"),
    ("1.8V", "1V8"),
    ("Base 1.8V", "1V8"),
    ("1.5V PSU", "1V5"),
    ("Base 1.5V", "1V5"),
    ("1.0V CORE", "V_FPGA"),
    ("1.0 V", "V_FPGA"),
    ("FPGA 1.2 V", "V_FPGA"),
    ("Current 12 V", "12V0CURRENT"),
    ("Base Current", "12V0CURRENT"),
    ("Current 3.3 V", "3V3CURRENT"),
    ("Current 1.2 V", "1V2CURRENT"),
    ("Inlet", "TEMP_INLET"),
    ("Temp 1 (inlet)", "TEMP_INLET"),
    ("DC/DC Inlet", "TEMP_INLET"),
    ("T PATH UPD", "TEMP_INLET"),
    ("Outlet", "TEMP_OUTLET"),
    ("Temp 2 (outlet)", "TEMP_OUTLET"),
    ("FPGA S6", "TEMP_OUTLET"),
    ("T DCDC UPD", "TEMP_OUTLET"),
    ("FPGA DIE", "TEMP_FPGA"),
    ("FPGA V5", "TEMP_FPGA"),
    ("Middle", "TEMP1"),
    ("FMC1", "TEMP1"),
    ("Board Temp", "TEMP1"),
    ("LM75 Temp", "TEMP1"),
    ("T COOLER UPM", "TEMP1"),
    ("Temp CPU", "TEMP1"),
    ("FPGA PCB", "TEMP2"),
    ("FMC2", "TEMP2"),
    ("CPU Temp", "TEMP2"),
    ("LM75 Temp2", "TEMP2"),
    ("T TRAFO UPM", "TEMP2"),
    ("Temp I/O", "TEMP2"),
    ("CPLD", "TEMP3"),
    ("Fan 1", "FAN1"),
    ("Fan 2", "FAN2"),
    ("Fan 3", "FAN3"),
    ("Fan 4", "FAN4"),
    ("Fan 5", "FAN5"),
    ("Fan 6", "FAN6"),
    ("Current(Sum)", "I_TOTAL"),
    ("Ch01 Current", "I01"),
    ("Ch02 Current", "I02"),
    ("Ch03 Current", "I03"),
    ("Ch04 Current", "I04"),
    ("Ch05 Current", "I05"),
    ("Ch06 Current", "I06"),
    ("Ch07 Current", "I07"),
    ("Ch08 Current", "I08"),
    ("Ch09 Current", "I09"),
    ("Ch10 Current", "I10"),
    ("Ch11 Current", "I11"),
    ("Ch12 Current", "I12"),
    ("Ch13 Current", "I13"),
    ("Ch14 Current", "I14"),
    ("Ch15 Current", "I15"),
    ("Ch16 Current", "I16"),
    ("Ejector Handle", HOT_SWAP),
    ("HotSwap", HOT_SWAP),
    ("Hot Swap", HOT_SWAP),
];

/// Map a raw sensor label to its canonical sensor id.
pub fn canonical_sensor_id(label: &str) -> Option<&'static str> {
    SENSOR_LABELS
        .iter()
        .find(|(raw, _)| *raw == label)
        .map(|(_, id)| *id)
}

/// Map a raw engineering unit to its short form. Unknown units pass through.
pub fn canonical_unit(raw: &str) -> &str {
    match raw {
        "Volts" => "V",
        "Amps" => "A",
        "degrees C" => "C",
        "unspecified" => "",
        "RPM" => "RPM",
        other => other,
    }
}

pub fn is_digital(canonical_id: &str) -> bool {
    DIGITAL_SENSORS.contains(&canonical_id)
}

pub fn is_fan(canonical_id: &str) -> bool {
    canonical_id.starts_with("FAN")
}

/// One of the four alarm limits carried by a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdField {
    LoLo,
    Low,
    High,
    HiHi,
}

/// Map a `sensor get` threshold label to the limit it populates.
pub fn threshold_field(label: &str) -> Option<ThresholdField> {
    match label {
        "Lower Critical" => Some(ThresholdField::LoLo),
        "Lower Non-Critical" => Some(ThresholdField::Low),
        "Upper Non-Critical" => Some(ThresholdField::High),
        "Upper Critical" => Some(ThresholdField::HiHi),
        _ => None,
    }
}

/// Ordinal module alarm severity. Only ever compared, never shown raw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmLevel {
    #[default]
    Unset = 0,
    NoAlarm = 1,
    NonCritical = 2,
    Critical = 3,
    NonRecoverable = 4,
}

impl AlarmLevel {
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for AlarmLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AlarmLevel::Unset => "UNSET",
            AlarmLevel::NoAlarm => "NO_ALARM",
            AlarmLevel::NonCritical => "NON_CRITICAL",
            AlarmLevel::Critical => "CRITICAL",
            AlarmLevel::NonRecoverable => "NON_RECOVERABLE",
        };
        f.write_str(name)
    }
}

/// Map an `sdr` status token (`ok`, `lnc`, `ucr`, ...) to a severity.
pub fn severity_level(status: &str) -> Option<AlarmLevel> {
    match status {
        "ok" => Some(AlarmLevel::NoAlarm),
        "lnc" | "unc" => Some(AlarmLevel::NonCritical),
        "lcr" | "ucr" => Some(AlarmLevel::Critical),
        "lnr" | "unr" => Some(AlarmLevel::NonRecoverable),
        _ => None,
    }
}

/// Which hot-swap status/value strings count as the normal state.
///
/// Vendor firmware disagrees on these strings, so they are configuration
/// rather than constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotSwapPolicy {
    /// Status tokens that may indicate the normal state.
    pub normal_statuses: Vec<String>,
    /// Status token that is normal regardless of the value column.
    pub no_value_normal_status: String,
    /// Value strings that confirm the normal state for the other statuses.
    pub normal_values: Vec<String>,
    /// Statuses that never raise the module alarm level for this sensor.
    pub alarm_exempt_statuses: Vec<String>,
}

impl Default for HotSwapPolicy {
    fn default() -> Self {
        Self {
            normal_statuses: vec!["lnc".to_string(), "ok".to_string()],
            no_value_normal_status: "lnc".to_string(),
            normal_values: vec!["Module Handle Closed".to_string(), "Device Absent".to_string()],
            alarm_exempt_statuses: vec!["lnc".to_string()],
        }
    }
}

impl HotSwapPolicy {
    /// Resolve the digital hot-swap value from the status and value columns.
    pub fn digital_value(&self, status: &str, value: &str) -> f64 {
        if !self.normal_statuses.iter().any(|s| s == status) {
            return HOT_SWAP_FAULT;
        }
        if status == self.no_value_normal_status || self.normal_values.iter().any(|v| v == value) {
            HOT_SWAP_OK
        } else {
            HOT_SWAP_FAULT
        }
    }

    pub fn is_alarm_exempt(&self, status: &str) -> bool {
        self.alarm_exempt_statuses.iter().any(|s| s == status)
    }
}

/// MicroTCA bus identifiers as reported in FRU ids (`<bus>.<slot>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Pm,
    Cu,
    Amc,
    Mch,
}

impl BusKind {
    pub fn id(self) -> u8 {
        match self {
            BusKind::Pm => 10,
            BusKind::Cu => 30,
            BusKind::Amc => 193,
            BusKind::Mch => 194,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "pm" => Some(BusKind::Pm),
            "cu" => Some(BusKind::Cu),
            "amc" => Some(BusKind::Amc),
            "mch" => Some(BusKind::Mch),
            _ => None,
        }
    }
}

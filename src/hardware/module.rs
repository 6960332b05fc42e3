//! Module (FRU): one installed card and its sensors.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::catalog::{
    self, canonical_sensor_id, canonical_unit, severity_level, threshold_field, AlarmLevel,
    HotSwapPolicy, ThresholdField, FAN_THRESHOLDS, HOT_SWAP, HOT_SWAP_N_A,
};
use crate::channel::{IpmiTransport, SHELL_PROMPT};
use crate::hardware::types::{ModuleSnapshot, Sensor, ThresholdState, Timings};

/// Responses shorter than this come from an empty slot or a failed exchange.
pub const MIN_GOOD_RESPONSE_LEN: usize = 40;

/// Marker ipmitool prints when the MCH could not be reached.
pub const ERROR_MARKER: &str = "Error";

/// PICMG slot numbers are offset from the zero-based module slot.
pub const PICMG_SLOT_OFFSET: i32 = 4;

/// State shared by a crate and all of its modules.
pub struct CrateLink {
    pub channel: Arc<dyn IpmiTransport>,
    /// While set, no module refresh, threshold query or list rebuild runs.
    pub resetting: AtomicBool,
    pub hot_swap: HotSwapPolicy,
    pub timings: Timings,
}

impl CrateLink {
    pub fn new(channel: Arc<dyn IpmiTransport>, hot_swap: HotSwapPolicy, timings: Timings) -> Self {
        Self {
            channel,
            resetting: AtomicBool::new(false),
            hot_swap,
            timings,
        }
    }

    pub fn is_resetting(&self) -> bool {
        self.resetting.load(Ordering::SeqCst)
    }
}

/// One row of `sdr entity` output: `name | id | status | owner | value unit`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SdrRow<'a> {
    pub name: &'a str,
    pub sensor_id: &'a str,
    pub status: &'a str,
    pub owner: &'a str,
    pub value: &'a str,
}

pub fn parse_sdr_row(line: &str) -> Option<SdrRow<'_>> {
    let mut fields = line.split('|').map(str::trim);
    let row = SdrRow {
        name: fields.next()?,
        sensor_id: fields.next()?,
        status: fields.next()?,
        owner: fields.next()?,
        value: fields.next()?,
    };
    if fields.next().is_some() {
        return None;
    }
    Some(row)
}

/// Parse `label : value` lines of `sensor get` output into threshold limits.
pub fn parse_thresholds(text: &str) -> Vec<(ThresholdField, f64)> {
    text.lines()
        .filter_map(|line| {
            let (label, value) = line.split_once(':')?;
            let field = threshold_field(label.trim())?;
            let value = value.trim().parse::<f64>().ok()?;
            Some((field, value))
        })
        .collect()
}

pub struct Module {
    /// `<bus>.<slot>` id reported by the MCH; used to address queries.
    pub id: String,
    pub name: String,
    pub slot: i32,
    pub bus: u8,
    pub comms_ok: bool,
    pub alarm_level: AlarmLevel,
    pub sensors: BTreeMap<String, Sensor>,
    link: Arc<CrateLink>,
}

impl Module {
    pub fn new(id: &str, name: &str, bus: u8, slot: i32, link: Arc<CrateLink>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            slot,
            bus,
            comms_ok: false,
            alarm_level: AlarmLevel::Unset,
            sensors: BTreeMap::new(),
            link,
        }
    }

    /// Refresh every known sensor from `sdr entity <id>`.
    /// Failures degrade this module's status; nothing propagates.
    pub async fn read_sensors(&mut self) {
        if self.link.is_resetting() {
            debug!("Crate resetting, skipping sensor read for {}", self.id);
            return;
        }

        let channel = Arc::clone(&self.link.channel);
        match channel.send(&["sdr", "entity", &self.id]).await {
            Ok(response) => self.apply_sensor_dump(&response).await,
            Err(e) => {
                warn!("Sensor read failed for {} ({}): {}", self.name, self.id, e);
                self.mark_unreachable();
            }
        }
    }

    async fn apply_sensor_dump(&mut self, response: &str) {
        if response.len() < MIN_GOOD_RESPONSE_LEN || response.contains(ERROR_MARKER) {
            debug!("Module {} unreachable ({} bytes of output)", self.id, response.len());
            self.mark_unreachable();
            return;
        }

        self.comms_ok = true;
        self.set_sensors_invalid();
        let mut max_level = AlarmLevel::NoAlarm;

        for line in response.lines() {
            if line.contains(SHELL_PROMPT) {
                continue;
            }
            let Some(row) = parse_sdr_row(line) else {
                trace!("Skipping row: {}", line);
                continue;
            };
            let Some(canonical) = canonical_sensor_id(row.name) else {
                continue;
            };

            match self.reading(canonical, &row) {
                Some((value, unit)) => self.store_reading(canonical, row.name, value, unit).await,
                None => trace!("No reading in row: {}", line),
            }

            if let Some(level) = severity_level(row.status) {
                // Hot swap reports its normal (handle closed) state as a
                // non-critical status.
                if canonical == HOT_SWAP && self.link.hot_swap.is_alarm_exempt(row.status) {
                    continue;
                }
                max_level = max_level.max(level);
            }
        }

        self.alarm_level = max_level;
    }

    fn reading<'a>(&self, canonical: &str, row: &SdrRow<'a>) -> Option<(f64, &'a str)> {
        if catalog::is_digital(canonical) {
            return Some((self.link.hot_swap.digital_value(row.status, row.value), ""));
        }
        let (value, unit) = row.value.split_once(' ')?;
        let value = value.trim().parse::<f64>().ok()?;
        Some((value, canonical_unit(unit.trim())))
    }

    async fn store_reading(&mut self, canonical: &str, raw_label: &str, value: f64, unit: &str) {
        let sensor = self.sensors.entry(canonical.to_string()).or_insert_with(|| {
            let mut sensor = Sensor::new(canonical, raw_label);
            if catalog::is_digital(canonical) {
                sensor.value = HOT_SWAP_N_A;
            }
            sensor
        });
        sensor.value = value;
        sensor.unit = unit.to_string();
        sensor.valid = true;

        if !sensor.alarm_thresholds_loaded() {
            self.set_alarms(raw_label).await;
        }
    }

    /// Load the alarm thresholds of one sensor. Fans get fixed limits;
    /// everything else is queried once with `sensor get`.
    pub async fn set_alarms(&mut self, raw_label: &str) {
        let Some(canonical) = canonical_sensor_id(raw_label) else {
            return;
        };
        if self.link.is_resetting() {
            return;
        }

        if catalog::is_fan(canonical) {
            if let Some(sensor) = self.sensors.get_mut(canonical) {
                let [lolo, low, high, hihi] = FAN_THRESHOLDS;
                sensor.lolo = lolo;
                sensor.low = low;
                sensor.high = high;
                sensor.hihi = hihi;
                sensor.thresholds = ThresholdState::Valid;
            }
            return;
        }

        let channel = Arc::clone(&self.link.channel);
        let limits = match channel.send(&["sensor", "get", raw_label]).await {
            Ok(text) => parse_thresholds(&text),
            Err(e) => {
                // Modules without configured thresholds answer with an error.
                debug!("No thresholds for {} on {}: {}", raw_label, self.id, e);
                Vec::new()
            }
        };

        if let Some(sensor) = self.sensors.get_mut(canonical) {
            for (field, value) in &limits {
                sensor.set_threshold(*field, *value);
            }
            sensor.thresholds = if limits.is_empty() {
                ThresholdState::Unavailable
            } else {
                ThresholdState::Valid
            };
        }
    }

    /// Mark every known sensor stale without any I/O.
    pub fn set_sensors_invalid(&mut self) {
        for sensor in self.sensors.values_mut() {
            sensor.valid = false;
        }
    }

    fn mark_unreachable(&mut self) {
        self.comms_ok = false;
        self.alarm_level = AlarmLevel::NonRecoverable;
        self.set_sensors_invalid();
    }

    /// Power-cycle this module: deactivate, wait, activate. Best effort.
    pub async fn reset(&self) {
        let Some(slot) = self.slot.checked_add(PICMG_SLOT_OFFSET) else {
            warn!("Slot {} of {} has no picmg address", self.slot, self.name);
            return;
        };
        let slot = slot.to_string();
        let channel = &self.link.channel;

        if let Err(e) = channel.send(&["picmg", "deactivate", &slot]).await {
            warn!("Deactivate of {} (slot {}) failed: {}", self.name, slot, e);
        }

        tokio::time::sleep(self.link.timings.module_reset).await;

        if let Err(e) = channel.send(&["picmg", "activate", &slot]).await {
            warn!("Activate of {} (slot {}) failed: {}", self.name, slot, e);
        }
    }

    pub fn snapshot(&self) -> ModuleSnapshot {
        ModuleSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            bus: self.bus,
            slot: self.slot,
            comms_ok: self.comms_ok,
            alarm_level: self.alarm_level,
            sensors: self.sensors.values().cloned().collect(),
        }
    }
}

//! MicroTCA crate: module list, firmware metadata and the reset workflow.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use regex::Regex;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::catalog::{AlarmLevel, HotSwapPolicy};
use crate::channel::{ChannelError, CrateIdentity, IpmiTransport, SHELL_PROMPT};
use crate::hardware::module::{CrateLink, Module};
use crate::hardware::types::{CommsStatus, CrateEvent, CrateSnapshot, FirmwareInfo, Timings};

/// FRU slot numbers in `sdr elist fru` are offset from the zero-based slot.
pub const SLOT_OFFSET: i32 = 96;

/// MCH n (1 or 2) answers `fru print` as FRU id n + 2.
pub const MCH_FRU_ID_OFFSET: u8 = 2;

/// `fru print` line carrying the firmware banner, e.g.
/// `Product Extra : MCH FW V2.18.8 Final (r14042) (Mar 31 2017 - 11:29)`
pub const FW_TAG: &str = "Product Extra";

const EVENT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error, PartialEq)]
pub enum ResetError {
    #[error("crate reset already in progress")]
    AlreadyResetting,

    #[error("MCH did not come back after {attempts} attempts; try resetting the crate again")]
    ControllerUnreachable { attempts: u32 },
}

/// One row of `sdr elist fru`: `name | ref | status | id | description`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRow {
    pub name: String,
    pub id: String,
    pub bus: u8,
    pub slot: i32,
}

pub fn parse_module_row(line: &str) -> Option<ModuleRow> {
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    let [name, _reference, _status, id, _description] = fields.as_slice() else {
        return None;
    };
    let (bus, slot) = id.split_once('.')?;
    Some(ModuleRow {
        name: name.to_string(),
        id: id.to_string(),
        bus: bus.parse().ok()?,
        slot: slot.parse::<i32>().ok()?.checked_sub(SLOT_OFFSET)?,
    })
}

fn firmware_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r".*: MCH FW (.*) \(.*\) \((.*)\)").ok())
        .as_ref()
}

/// Extract version and build date from `fru print` output.
pub fn parse_firmware(text: &str) -> Option<FirmwareInfo> {
    let pattern = firmware_pattern()?;
    text.lines()
        .filter(|line| line.contains(FW_TAG))
        .find_map(|line| pattern.captures(line))
        .map(|caps| FirmwareInfo {
            version: caps[1].to_string(),
            date: caps[2].to_string(),
        })
}

/// MCH uptime in fractional days from `sel time get` output
/// (`MM/DD/YYYY HH:MM:SS`, counted from the epoch the MCH boots into).
pub fn parse_sel_uptime(text: &str) -> Option<f64> {
    let first = text.lines().next()?.trim();
    let now = chrono::NaiveDateTime::parse_from_str(first, "%m/%d/%Y %H:%M:%S").ok()?;
    let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1)?.and_hms_opt(0, 0, 0)?;
    Some(now.signed_duration_since(epoch).num_seconds() as f64 / 86_400.0)
}

pub struct Crate {
    link: Arc<CrateLink>,
    identity: RwLock<CrateIdentity>,
    /// Keyed by (bus, slot); rebuilt wholesale on every scan.
    modules: Mutex<BTreeMap<(u8, i32), Module>>,
    modules_initialized: AtomicBool,
    /// Keyed by MCH index (1, 2).
    firmware: RwLock<BTreeMap<u8, FirmwareInfo>>,
    uptime_days: RwLock<Option<f64>>,
    events: broadcast::Sender<CrateEvent>,
}

impl Crate {
    pub fn new(channel: Arc<dyn IpmiTransport>, hot_swap: HotSwapPolicy, timings: Timings) -> Self {
        let (events, _) = broadcast::channel(EVENT_QUEUE_DEPTH);
        Self {
            link: Arc::new(CrateLink::new(channel, hot_swap, timings)),
            identity: RwLock::new(CrateIdentity::default()),
            modules: Mutex::new(BTreeMap::new()),
            modules_initialized: AtomicBool::new(false),
            firmware: RwLock::new(BTreeMap::new()),
            uptime_days: RwLock::new(None),
            events,
        }
    }

    pub fn set_host(&self, host: &str) {
        self.update_identity(|id| id.host = Some(host.to_string()));
    }

    pub fn set_user(&self, user: &str) {
        self.update_identity(|id| id.user = Some(user.to_string()));
    }

    pub fn set_password(&self, password: &str) {
        self.update_identity(|id| id.password = Some(password.to_string()));
    }

    fn update_identity(&self, change: impl FnOnce(&mut CrateIdentity)) {
        let identity = {
            let mut guard = self.identity.write().unwrap_or_else(|p| p.into_inner());
            change(&mut guard);
            guard.clone()
        };
        self.link.channel.set_identity(identity);
    }

    pub fn identity(&self) -> CrateIdentity {
        self.identity.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Scan notifications: emitted after every refresh that changed
    /// externally visible state.
    pub fn subscribe(&self) -> broadcast::Receiver<CrateEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: CrateEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn is_resetting(&self) -> bool {
        self.link.is_resetting()
    }

    pub fn modules_initialized(&self) -> bool {
        self.modules_initialized.load(Ordering::SeqCst)
    }

    /// Rebuild the module list from `sdr elist fru`.
    /// Returns false when the crate is not configured or is resetting.
    pub async fn populate_module_list(&self) -> bool {
        if self.is_resetting() {
            debug!("Crate resetting, skipping module list rebuild");
            return false;
        }
        self.populate_modules().await
    }

    async fn populate_modules(&self) -> bool {
        // Readers see an empty crate while the list is rebuilt.
        self.modules_initialized.store(false, Ordering::SeqCst);
        self.modules.lock().await.clear();

        if !self.identity().is_complete() {
            warn!("Crate information not populated (host, user and password are required)");
            return false;
        }

        // An empty answer can mean the MCH is still rescanning its bus.
        let response = loop {
            match self.link.channel.send(&["sdr", "elist", "fru"]).await {
                Ok(text) if !text.trim().is_empty() => break text,
                Ok(_) => debug!("Empty module list, retrying"),
                Err(e) => warn!("Module list query failed: {}", e),
            }
            tokio::time::sleep(self.link.timings.list_retry).await;
        };

        let mut found = BTreeMap::new();
        for line in response.lines().filter(|l| !l.contains(SHELL_PROMPT)) {
            let Some(row) = parse_module_row(line) else {
                debug!("Couldn't parse module row: {}", line);
                continue;
            };
            found.entry((row.bus, row.slot)).or_insert_with(|| {
                debug!("Found module {} ({}) at bus {} slot {}", row.name, row.id, row.bus, row.slot);
                Module::new(&row.id, &row.name, row.bus, row.slot, Arc::clone(&self.link))
            });
        }

        info!("Module list populated: {} modules", found.len());
        *self.modules.lock().await = found;
        self.modules_initialized.store(true, Ordering::SeqCst);

        self.read_firmware_version().await;
        self.notify(CrateEvent::ModulesPopulated);
        true
    }

    /// Refresh every module, or mark everything stale when the module
    /// list is not usable. Skipped entirely while resetting.
    pub async fn read_all_sensors(&self) {
        if self.is_resetting() {
            debug!("Crate resetting, skipping sensor refresh");
            return;
        }
        self.refresh_modules().await;
    }

    async fn refresh_modules(&self) {
        let mut modules = self.modules.lock().await;
        if self.modules_initialized() {
            for module in modules.values_mut() {
                module.read_sensors().await;
            }
            self.notify(CrateEvent::SensorsUpdated);
        } else {
            for module in modules.values_mut() {
                module.set_sensors_invalid();
            }
            self.notify(CrateEvent::SensorsInvalidated);
        }
    }

    /// Read firmware version and date of both MCHs.
    pub async fn read_firmware_version(&self) {
        for mch in 1..=2u8 {
            let fru_id = (mch + MCH_FRU_ID_OFFSET).to_string();
            let info = match self.link.channel.send(&["fru", "print", &fru_id]).await {
                Ok(text) => parse_firmware(&text).unwrap_or_else(FirmwareInfo::unknown),
                Err(e) => {
                    debug!("Firmware query for MCH {} failed: {}", mch, e);
                    FirmwareInfo::unknown()
                }
            };
            debug!("MCH {} firmware: {} ({})", mch, info.version, info.date);
            self.firmware
                .write()
                .unwrap_or_else(|p| p.into_inner())
                .insert(mch, info);
        }
    }

    pub fn firmware(&self, mch: u8) -> FirmwareInfo {
        self.firmware
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&mch)
            .cloned()
            .unwrap_or_else(FirmwareInfo::unknown)
    }

    /// Read the MCH clock and derive its uptime.
    pub async fn read_controller_uptime(&self) {
        if self.is_resetting() {
            return;
        }
        match self.link.channel.send(&["sel", "time", "get"]).await {
            Ok(text) => match parse_sel_uptime(&text) {
                Some(days) => *self.uptime_days.write().unwrap_or_else(|p| p.into_inner()) = Some(days),
                None => debug!("Unexpected sel time output: {}", text.trim()),
            },
            Err(e) => debug!("MCH uptime query failed: {}", e),
        }
    }

    pub fn uptime_days(&self) -> Option<f64> {
        *self.uptime_days.read().unwrap_or_else(|p| p.into_inner())
    }

    pub async fn comms_status(&self, bus: u8, slot: i32) -> CommsStatus {
        match self.modules.lock().await.get(&(bus, slot)) {
            Some(module) if module.comms_ok && !self.is_resetting() => CommsStatus::Ok,
            Some(_) => CommsStatus::Error,
            None => CommsStatus::None,
        }
    }

    pub async fn alarm_level(&self, bus: u8, slot: i32) -> AlarmLevel {
        self.modules
            .lock()
            .await
            .get(&(bus, slot))
            .map(|m| m.alarm_level)
            .unwrap_or(AlarmLevel::Unset)
    }

    /// Deactivate and reactivate one module. Returns false if the slot is empty.
    pub async fn reset_module(&self, bus: u8, slot: i32) -> bool {
        if self.is_resetting() {
            return false;
        }
        let modules = self.modules.lock().await;
        match modules.get(&(bus, slot)) {
            Some(module) => {
                info!("Resetting module {} ({})", module.name, module.id);
                module.reset().await;
                true
            }
            None => false,
        }
    }

    /// Power-cycle the whole crate and rebuild the module list once the
    /// MCH answers again.
    ///
    /// The persistent session dies with the crate, so liveness is polled
    /// with direct invocations. The crate is unlocked as soon as the MCH
    /// answers, or when the retry budget runs out, so a later attempt can
    /// still reach it.
    pub async fn reset(&self) -> Result<(), ResetError> {
        if self.link.resetting.swap(true, Ordering::SeqCst) {
            return Err(ResetError::AlreadyResetting);
        }
        self.modules_initialized.store(false, Ordering::SeqCst);
        self.notify(CrateEvent::ResetStarted);

        let timings = &self.link.timings;
        let channel = &self.link.channel;

        info!("Short wait before resetting ({:?})", timings.settle);
        tokio::time::sleep(timings.settle).await;
        // Uninitialized, so this only marks everything stale.
        self.refresh_modules().await;

        info!("Resetting crate now");
        match channel.send(&["raw", "0x06", "0x03"]).await {
            Ok(_) | Err(ChannelError::Timeout(_)) => {}
            Err(e) => debug!("Reset command reported: {}", e),
        }
        channel.disconnect().await;

        info!("Waiting for MCH to come up");
        let mut attempts = 0;
        let mut crate_up = false;
        while attempts < timings.max_reset_retries {
            attempts += 1;
            info!("Checking comms to MCH, attempt {}", attempts);
            match channel.send_direct(&["mc", "info"]).await {
                Ok(_) => {
                    crate_up = true;
                    break;
                }
                Err(e) => {
                    debug!("MCH not answering: {}", e);
                    tokio::time::sleep(timings.liveness_interval).await;
                }
            }
        }

        if !crate_up {
            self.link.resetting.store(false, Ordering::SeqCst);
            self.notify(CrateEvent::ResetFailed);
            error!("Reached maximum number of retries ({}). Please try resetting crate again.", attempts);
            return Err(ResetError::ControllerUnreachable { attempts });
        }

        // The MCH answers again. The list rebuild below may retry for a
        // long time, so it must not keep the crate locked.
        self.link.resetting.store(false, Ordering::SeqCst);

        info!("MCH is up, waiting {:?} for it to update its sensor lists", timings.controller_warmup);
        tokio::time::sleep(timings.controller_warmup).await;

        info!("Restarting comms to MCH");
        if let Err(e) = channel.connect().await {
            warn!("Reconnect to MCH failed: {}", e);
        }
        self.populate_modules().await;

        self.notify(CrateEvent::ResetCompleted);
        info!("Crate reset complete");
        Ok(())
    }

    pub async fn snapshot(&self) -> CrateSnapshot {
        let modules = self.modules.lock().await;
        CrateSnapshot {
            host: self.identity().host,
            modules_initialized: self.modules_initialized(),
            resetting: self.is_resetting(),
            firmware: self
                .firmware
                .read()
                .unwrap_or_else(|p| p.into_inner())
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            uptime_days: self.uptime_days(),
            modules: modules.values().map(Module::snapshot).collect(),
        }
    }

    /// Tear down the persistent session. Call once at process exit.
    pub async fn shutdown(&self) {
        self.link.channel.disconnect().await;
    }
}

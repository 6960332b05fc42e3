//! Crate model: the crate, its modules (FRUs) and their sensors.

pub mod module;
pub mod mtca_crate;
pub mod types;

pub use module::{CrateLink, Module};
pub use mtca_crate::{Crate, ResetError};
pub use types::{CommsStatus, CrateEvent, CrateSnapshot, FirmwareInfo, Sensor, ThresholdState, Timings};

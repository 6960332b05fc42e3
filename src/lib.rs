//! MicroTCA crate monitor.
//! Drives `ipmitool` against a crate's MCH to keep a live model of installed
//! modules, their sensors and alarm levels, and to power-cycle the crate.

pub mod app;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod hardware;

pub use catalog::{AlarmLevel, HotSwapPolicy};
pub use channel::{ChannelError, CrateIdentity, IpmiTransport};
pub use hardware::{Crate, CrateEvent, Module, Sensor};

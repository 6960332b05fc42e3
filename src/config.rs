//! Monitor configuration: JSON file types, defaults and persistence.

pub mod persistence;
pub mod types;

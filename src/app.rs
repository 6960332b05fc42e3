//! Binary-side plumbing: command-line arguments and log output.

pub mod cli;
pub mod logging;

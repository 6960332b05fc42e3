//! Command channel to the crate's MCH.
//!
//! `ipmitool`'s text output is the only wire format. The channel hides
//! whether a command went through the persistent `ipmitool shell` session
//! or a one-shot invocation.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod executor;
pub mod framer;
pub mod shell;

#[cfg(test)]
pub mod mock;

pub use shell::{IpmitoolShell, ShellSettings};

/// Idle prompt printed by `ipmitool shell`; delimits one response from the next.
pub const SHELL_PROMPT: &str = "ipmitool>";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChannelError {
    /// No prompt (or process exit) within the command bound.
    #[error("ipmitool did not answer within {0:?}")]
    Timeout(Duration),

    /// The process exited non-zero, died, or rejected the request.
    #[error("ipmitool failed: {0}")]
    Process(String),

    /// Pipe or spawn failure.
    #[error("ipmitool i/o error: {0}")]
    Io(String),

    #[error("crate connection details are not set (host, user and password are required)")]
    NotConfigured,
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        ChannelError::Io(e.to_string())
    }
}

/// Connection identity for one crate's MCH.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrateIdentity {
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl CrateIdentity {
    pub fn is_complete(&self) -> bool {
        self.host.is_some() && self.user.is_some() && self.password.is_some()
    }
}

/// Serialized access to the management utility.
///
/// Implementations allow at most one command in flight; a second caller
/// waits for the first to finish.
#[async_trait]
pub trait IpmiTransport: Send + Sync {
    /// Replace the identity used for the next connection or invocation.
    fn set_identity(&self, identity: CrateIdentity);

    /// Start the persistent session. No-op when already connected.
    async fn connect(&self) -> Result<(), ChannelError>;

    /// Run one command through the persistent session and return its output.
    async fn send(&self, command: &[&str]) -> Result<String, ChannelError>;

    /// Run one command as a standalone invocation, bypassing the session.
    async fn send_direct(&self, command: &[&str]) -> Result<Vec<u8>, ChannelError>;

    /// Tear down the persistent session and its reader task.
    async fn disconnect(&self);

    async fn is_connected(&self) -> bool;
}

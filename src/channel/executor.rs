//! ipmitool subprocess builder and one-shot executor.
//! Every invocation, persistent or direct, shares the same identity flags.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, trace};

use super::{ChannelError, CrateIdentity};

/// Program and fixed arguments used to launch ipmitool.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: PathBuf,
    /// Arguments placed before the identity flags (used to wrap the tool).
    pub leading_args: Vec<String>,
    /// `-I` interface, e.g. `lan` or `lanplus`.
    pub interface: Option<String>,
    /// `-A` authentication type, e.g. `NONE`.
    pub auth_type: Option<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            interface: None,
            auth_type: None,
        }
    }

    /// Resolve the ipmitool binary: explicit path, else `$IPMITOOL/ipmitool`,
    /// else `ipmitool` from `PATH`.
    pub fn resolve(path: Option<&str>) -> Self {
        let program = match path {
            Some(p) => PathBuf::from(p),
            None => std::env::var("IPMITOOL")
                .map(|dir| PathBuf::from(dir).join("ipmitool"))
                .unwrap_or_else(|_| PathBuf::from("ipmitool")),
        };
        Self::new(program)
    }

    /// Build a Command addressed at the crate's MCH.
    pub fn build(&self, identity: &CrateIdentity) -> Result<tokio::process::Command, ChannelError> {
        let host = identity.host.as_deref().ok_or(ChannelError::NotConfigured)?;

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.leading_args);
        if let Some(interface) = &self.interface {
            cmd.args(["-I", interface]);
        }
        cmd.args(["-H", host]);
        if let Some(user) = &identity.user {
            cmd.args(["-U", user]);
        }
        if let Some(password) = &identity.password {
            cmd.args(["-P", password]);
        }
        if let Some(auth) = &self.auth_type {
            cmd.args(["-A", auth]);
        }
        cmd.kill_on_drop(true);
        Ok(cmd)
    }
}

/// Execute one ipmitool command outside the persistent session.
pub async fn run_direct(
    tool: &ToolCommand,
    identity: &CrateIdentity,
    command: &[&str],
    bound: Duration,
) -> Result<Vec<u8>, ChannelError> {
    let mut cmd = tool.build(identity)?;
    cmd.args(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("Executing: ipmitool {}", command.join(" "));
    run_bounded(cmd, bound).await
}

/// Execute `ipmitool -V`.
pub async fn run_version(tool: &ToolCommand, bound: Duration) -> Result<String, ChannelError> {
    let mut cmd = tokio::process::Command::new(&tool.program);
    cmd.args(&tool.leading_args)
        .arg("-V")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let out = run_bounded(cmd, bound).await?;
    Ok(String::from_utf8_lossy(&out).trim().to_string())
}

async fn run_bounded(mut cmd: tokio::process::Command, bound: Duration) -> Result<Vec<u8>, ChannelError> {
    let output = tokio::time::timeout(bound, cmd.output())
        .await
        .map_err(|_| ChannelError::Timeout(bound))??;

    trace!("ipmitool exited with {}", output.status);

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ChannelError::Process(if stderr.is_empty() {
            format!("exit status {}", output.status)
        } else {
            stderr
        }));
    }

    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> CrateIdentity {
        CrateIdentity {
            host: Some("mch01".to_string()),
            user: Some("root".to_string()),
            password: Some("secret".to_string()),
        }
    }

    fn args_of(cmd: &tokio::process::Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_build_includes_identity() {
        let mut tool = ToolCommand::new("ipmitool");
        tool.interface = Some("lan".to_string());
        tool.auth_type = Some("NONE".to_string());
        let cmd = tool.build(&identity()).unwrap();
        assert_eq!(
            args_of(&cmd),
            ["-I", "lan", "-H", "mch01", "-U", "root", "-P", "secret", "-A", "NONE"]
        );
    }

    #[test]
    fn test_build_requires_host() {
        let tool = ToolCommand::new("ipmitool");
        assert_eq!(
            tool.build(&CrateIdentity::default()).err(),
            Some(ChannelError::NotConfigured)
        );
    }

    #[test]
    fn test_resolve_explicit_path() {
        let tool = ToolCommand::resolve(Some("/opt/ipmi/bin/ipmitool"));
        assert_eq!(tool.program, PathBuf::from("/opt/ipmi/bin/ipmitool"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_direct_nonzero_exit_is_process_error() {
        let mut tool = ToolCommand::new("/bin/sh");
        tool.leading_args = vec!["-c".to_string(), "echo 'no route' >&2; exit 1".to_string()];
        let err = run_direct(&tool, &identity(), &["mc", "info"], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, ChannelError::Process("no route".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_direct_returns_stdout() {
        let mut tool = ToolCommand::new("/bin/sh");
        tool.leading_args = vec!["-c".to_string(), "echo 'Device ID : 3'".to_string()];
        let out = run_direct(&tool, &identity(), &["mc", "info"], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out), "Device ID : 3\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_direct_timeout() {
        let mut tool = ToolCommand::new("/bin/sh");
        tool.leading_args = vec!["-c".to_string(), "sleep 5".to_string()];
        let err = run_direct(&tool, &identity(), &["mc", "info"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err, ChannelError::Timeout(Duration::from_millis(100)));
    }
}

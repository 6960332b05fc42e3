//! Persistent `ipmitool shell` session.
//!
//! One long-lived ipmitool process amortizes the spawn and session setup
//! cost over every sensor query. A reader task owns the process output,
//! frames it on the idle prompt and hands completed blocks to the caller
//! through a bounded channel.

use std::process::Stdio;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::executor::{self, ToolCommand};
use super::framer::{command_line, extract_response, ResponseFramer};
use super::{ChannelError, CrateIdentity, IpmiTransport, SHELL_PROMPT};

const RESPONSE_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Clone)]
pub struct ShellSettings {
    /// Bound on every command, persistent or direct.
    pub command_timeout: Duration,
    /// Time allowed for the shell to exit before it is killed.
    pub teardown_grace: Duration,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
            teardown_grace: Duration::from_secs(2),
        }
    }
}

struct Session {
    child: Child,
    stdin: ChildStdin,
    responses: mpsc::Receiver<Vec<String>>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    /// Set while a command is outstanding. Still set on entry means the
    /// previous caller was dropped mid-exchange and its output may arrive late.
    busy: bool,
}

impl Session {
    /// Close stdin, terminate, kill after the grace period, join the reader.
    async fn shutdown(self, grace: Duration) {
        let Session { mut child, stdin, responses, cancel, reader, .. } = self;
        drop(stdin);
        drop(responses);

        terminate(&mut child);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => debug!("ipmitool shell exited: {}", status),
            Ok(Err(e)) => warn!("Failed to wait for ipmitool shell: {}", e),
            Err(_) => {
                warn!("ipmitool shell ignored terminate, killing it");
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill ipmitool shell: {}", e);
                }
            }
        }

        cancel.cancel();
        if let Err(e) = reader.await {
            warn!("ipmitool reader task ended abnormally: {}", e);
        }
    }
}

#[cfg(target_os = "linux")]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to our own child process.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

/// `ipmitool shell` transport with a direct-mode fallback.
pub struct IpmitoolShell {
    tool: ToolCommand,
    settings: ShellSettings,
    identity: RwLock<CrateIdentity>,
    /// The in-flight lock: held for the whole exchange of one command.
    session: Mutex<Option<Session>>,
}

impl IpmitoolShell {
    pub fn new(tool: ToolCommand, settings: ShellSettings) -> Self {
        Self {
            tool,
            settings,
            identity: RwLock::new(CrateIdentity::default()),
            session: Mutex::new(None),
        }
    }

    /// Report the ipmitool version string (`ipmitool -V`).
    pub async fn tool_version(&self) -> Result<String, ChannelError> {
        executor::run_version(&self.tool, self.settings.command_timeout).await
    }

    fn identity(&self) -> CrateIdentity {
        self.identity
            .read()
            .map(|id| id.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn spawn_session(&self) -> Result<Session, ChannelError> {
        let identity = self.identity();
        let mut cmd = self.tool.build(&identity)?;
        cmd.arg("shell")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| ChannelError::Io("no stdin pipe".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| ChannelError::Io("no stdout pipe".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| ChannelError::Io("no stderr pipe".into()))?;

        let (tx, responses) = mpsc::channel(RESPONSE_QUEUE_DEPTH);
        let cancel = CancellationToken::new();
        let reader = tokio::spawn(read_output(stdout, stderr, tx, cancel.clone()));

        info!(
            "ipmitool shell connected to {}",
            identity.host.as_deref().unwrap_or("?")
        );

        Ok(Session { child, stdin, responses, cancel, reader, busy: false })
    }

    async fn exchange(
        &self,
        session: &mut Session,
        command: &[&str],
    ) -> Result<String, ChannelError> {
        // Anything still queued belongs to an earlier command.
        while session.responses.try_recv().is_ok() {}

        let line = command_line(command);
        debug!("ipmitool> {}", line);

        // The empty line makes the shell print a second prompt, which is
        // what closes the response block.
        let input = format!("{}\n\n", line);
        session
            .stdin
            .write_all(input.as_bytes())
            .await
            .map_err(|e| ChannelError::Process(format!("shell stdin closed: {}", e)))?;
        session
            .stdin
            .flush()
            .await
            .map_err(|e| ChannelError::Process(format!("shell stdin closed: {}", e)))?;

        match tokio::time::timeout(self.settings.command_timeout, session.responses.recv()).await {
            Ok(Some(block)) => Ok(extract_response(&block, SHELL_PROMPT)),
            Ok(None) => Err(ChannelError::Process("ipmitool shell exited".into())),
            Err(_) => Err(ChannelError::Timeout(self.settings.command_timeout)),
        }
    }
}

#[async_trait]
impl IpmiTransport for IpmitoolShell {
    fn set_identity(&self, identity: CrateIdentity) {
        match self.identity.write() {
            Ok(mut current) => *current = identity,
            Err(poisoned) => *poisoned.into_inner() = identity,
        }
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn_session()?);
        }
        Ok(())
    }

    async fn send(&self, command: &[&str]) -> Result<String, ChannelError> {
        let mut guard = self.session.lock().await;
        if guard.as_ref().is_some_and(|s| s.busy) {
            debug!("Previous command was abandoned, restarting ipmitool shell");
            if let Some(session) = guard.take() {
                session.shutdown(self.settings.teardown_grace).await;
            }
        }
        if guard.is_none() {
            *guard = Some(self.spawn_session()?);
        }
        let Some(session) = guard.as_mut() else {
            return Err(ChannelError::Process("ipmitool shell unavailable".into()));
        };

        session.busy = true;
        let result = self.exchange(session, command).await;
        session.busy = false;

        // A stuck or dead session cannot be trusted to frame the next
        // response; drop it so the next command starts clean.
        if let Err(e) = &result {
            debug!("Dropping ipmitool shell after error: {}", e);
            if let Some(session) = guard.take() {
                session.shutdown(self.settings.teardown_grace).await;
            }
        }
        result
    }

    async fn send_direct(&self, command: &[&str]) -> Result<Vec<u8>, ChannelError> {
        let identity = self.identity();
        executor::run_direct(&self.tool, &identity, command, self.settings.command_timeout).await
    }

    async fn disconnect(&self) {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.take() {
            info!("Stopping ipmitool shell");
            session.shutdown(self.settings.teardown_grace).await;
        }
    }

    async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }
}

/// Reader task: frame stdout and stderr lines until cancelled or EOF.
async fn read_output(
    stdout: ChildStdout,
    stderr: ChildStderr,
    tx: mpsc::Sender<Vec<String>>,
    cancel: CancellationToken,
) {
    let mut out = BufReader::new(stdout).lines();
    let mut err = BufReader::new(stderr).lines();
    let mut err_open = true;
    let mut framer = ResponseFramer::new(SHELL_PROMPT);

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = out.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("ipmitool shell closed its output");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read ipmitool output: {}", e);
                    break;
                }
            },
            line = err.next_line(), if err_open => match line {
                Ok(Some(line)) => {
                    debug!("ipmitool stderr: {}", line);
                    line
                }
                _ => {
                    err_open = false;
                    continue;
                }
            },
        };

        trace!("< {}", line);
        if let Some(block) = framer.push(line) {
            if tx.send(block).await.is_err() {
                break;
            }
        }
    }
}

//! Scripted transport for exercising the crate model without hardware.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ChannelError, CrateIdentity, IpmiTransport};

/// Answers commands from a table keyed by the space-joined command tokens
/// and records every command it sees.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<Result<String, ChannelError>>>>,
    direct_replies: Mutex<VecDeque<Result<Vec<u8>, ChannelError>>>,
    sent: Mutex<Vec<String>>,
    sent_direct: Mutex<Vec<String>>,
    identity: Mutex<CrateIdentity>,
    connected: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next answer to `command`. Replies are consumed in order;
    /// the last one repeats.
    pub fn reply(&self, command: &str, response: &str) {
        self.push(command, Ok(response.to_string()));
    }

    pub fn fail(&self, command: &str, error: ChannelError) {
        self.push(command, Err(error));
    }

    /// Queue the result of the next direct invocation. Unscripted direct
    /// calls succeed with no output.
    pub fn queue_direct(&self, result: Result<Vec<u8>, ChannelError>) {
        self.direct_replies.lock().unwrap().push_back(result);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_direct(&self) -> Vec<String> {
        self.sent_direct.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|c| *c == command).count()
    }

    pub fn identity(&self) -> CrateIdentity {
        self.identity.lock().unwrap().clone()
    }

    fn push(&self, command: &str, result: Result<String, ChannelError>) {
        self.replies
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(result);
    }
}

#[async_trait]
impl IpmiTransport for ScriptedTransport {
    fn set_identity(&self, identity: CrateIdentity) {
        *self.identity.lock().unwrap() = identity;
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn send(&self, command: &[&str]) -> Result<String, ChannelError> {
        self.connect().await?;
        let line = command.join(" ");
        self.sent.lock().unwrap().push(line.clone());

        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(&line) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap(),
            None => Err(ChannelError::Process(format!("no scripted reply for '{}'", line))),
        }
    }

    async fn send_direct(&self, command: &[&str]) -> Result<Vec<u8>, ChannelError> {
        self.sent_direct.lock().unwrap().push(command.join(" "));
        self.direct_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

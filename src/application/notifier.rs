//! The capability business logic uses to ask for artifact rebuilds.

use std::sync::Mutex;

use boardcache_wire::RebuildMessage;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::cache::lock::mutex_lock;

/// Fire-and-forget sink for rebuild requests.
///
/// Implementations never block and never report failure to the caller; a lost
/// request only delays convergence.
pub trait RebuildNotifier: Send + Sync {
    fn request_rebuild(&self, message: RebuildMessage);
}

/// Delivers requests to an in-process queue mailbox.
#[derive(Clone)]
pub struct ChannelNotifier {
    sender: UnboundedSender<RebuildMessage>,
}

impl ChannelNotifier {
    pub fn new(sender: UnboundedSender<RebuildMessage>) -> Self {
        Self { sender }
    }
}

impl RebuildNotifier for ChannelNotifier {
    fn request_rebuild(&self, message: RebuildMessage) {
        if let Err(err) = self.sender.send(message) {
            warn!(
                target = "boardcache::notifier",
                message = ?err.0,
                "Rebuild mailbox closed; request dropped"
            );
        }
    }
}

/// Records every request; used by tests.
#[derive(Default)]
pub struct CollectingNotifier {
    messages: Mutex<Vec<RebuildMessage>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<RebuildMessage> {
        mutex_lock(&self.messages, "application::notifier", "messages").clone()
    }

    pub fn take(&self) -> Vec<RebuildMessage> {
        std::mem::take(&mut *mutex_lock(
            &self.messages,
            "application::notifier",
            "take",
        ))
    }
}

impl RebuildNotifier for CollectingNotifier {
    fn request_rebuild(&self, message: RebuildMessage) {
        mutex_lock(&self.messages, "application::notifier", "request_rebuild").push(message);
    }
}

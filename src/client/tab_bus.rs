//! Same-origin signalling between controllers ("tabs") sharing one runtime.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::queue::Revision;

/// Sent after a successful push: `{revision, source_tab_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabMessage {
    pub revision: Revision,
    pub source_tab_id: Uuid,
}

#[derive(Clone)]
pub struct TabBus {
    tx: broadcast::Sender<TabMessage>,
}

impl TabBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn publish(&self, message: TabMessage) {
        // a lone tab has nobody listening
        let _ = self.tx.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TabMessage> {
        self.tx.subscribe()
    }
}

impl Default for TabBus {
    fn default() -> Self {
        Self::new()
    }
}

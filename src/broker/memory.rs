//! In-process broker: per-channel fan-out over tokio mpsc. Used by the
//! test harness and single-process mode; messages to channels without a
//! subscriber are dropped, matching broker semantics for absent agents.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::Result;

use super::{AgentMessage, MessageSource, Publisher};

const CHANNEL_DEPTH: usize = 64;

#[derive(Default)]
pub struct MemoryBroker {
    channels: Mutex<HashMap<String, Vec<mpsc::Sender<AgentMessage>>>>,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribes to a channel; the returned source yields every message
    /// published after this call.
    pub fn subscribe(&self, channel: &str) -> MemorySubscription {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        MemorySubscription { rx }
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, channel: &str, message: &AgentMessage) -> Result<()> {
        let senders = {
            let mut channels = self.channels.lock();
            match channels.get_mut(channel) {
                Some(senders) => {
                    // Drop subscribers whose receiver is gone.
                    senders.retain(|tx| !tx.is_closed());
                    senders.clone()
                }
                None => return Ok(()),
            }
        };
        for tx in senders {
            // A full queue means a wedged subscriber; the message is
            // droppable because delivery is best-effort.
            let _ = tx.try_send(message.clone());
        }
        Ok(())
    }
}

pub struct MemorySubscription {
    rx: mpsc::Receiver<AgentMessage>,
}

#[async_trait]
impl MessageSource for MemorySubscription {
    async fn next(&mut self) -> Option<AgentMessage> {
        self.rx.recv().await
    }
}

//! Pub/sub fabric between the control plane and agents.
//!
//! The broker process itself is external. The server publishes through
//! [`Publisher`] (broker-native HTTP publish); each agent subscribes to its
//! own channel and reads typed [`AgentMessage`]s through [`MessageSource`].
//! [`memory::MemoryBroker`] implements both halves in process for tests
//! and single-process mode.

pub mod http;
pub mod memory;
pub mod ws;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Channel an agent listens on: `agents.<tenant_id>.<agent_id>`.
pub fn agent_channel(tenant_id: &str, agent_id: &str) -> String {
    format!("agents.{tenant_id}.{agent_id}")
}

/// Messages carried over per-agent channels, discriminated by `type`.
/// No ordering is guaranteed across brokers; every message is safe to
/// re-deliver because the lease CAS is the authority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    JobAvailable {
        job_id: Uuid,
    },
    CancelJob {
        job_id: Uuid,
    },
    UpgradeAvailable {
        version: String,
        url: String,
        sha256: String,
        signature: String,
        key_id: String,
    },
    Heartbeat {
        state: String,
        active_jobs: u32,
    },
}

/// Server-side publish half. Errors are reported to the caller but the
/// scheduler treats them as non-fatal: the job stays pending.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel: &str, message: &AgentMessage) -> Result<()>;
}

/// Agent-side subscription half: a stream of typed messages from the
/// agent's own channel. Returns `None` when the connection is gone.
#[async_trait]
pub trait MessageSource: Send {
    async fn next(&mut self) -> Option<AgentMessage>;
}

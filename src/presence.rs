//! Short-TTL liveness register keyed by (tenant, project, agent).
//!
//! Entries are owned by the agent that announced them and refreshed by its
//! heartbeat; existence is what matters. The production backing is a
//! key-value cache with TTL; [`MemoryPresence`] keeps a per-project map so
//! the scheduler never pays for a full key scan.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Writes or refreshes the entry for `agent_id` with the given TTL.
    async fn announce(
        &self,
        tenant_id: &str,
        project_id: &str,
        agent_id: &str,
        ttl: Duration,
    ) -> Result<()>;

    async fn remove(&self, tenant_id: &str, project_id: &str, agent_id: &str) -> Result<()>;

    /// Currently-present agent ids for a project, in stable order.
    async fn list(&self, tenant_id: &str, project_id: &str) -> Result<Vec<String>>;

    async fn is_present(&self, tenant_id: &str, project_id: &str, agent_id: &str)
        -> Result<bool>;
}

#[derive(Default)]
pub struct MemoryPresence {
    // (tenant, project) -> agent -> expiry. Expired entries are dropped
    // lazily on read.
    entries: Mutex<HashMap<(String, String), HashMap<String, Instant>>>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresence {
    async fn announce(
        &self,
        tenant_id: &str,
        project_id: &str,
        agent_id: &str,
        ttl: Duration,
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        entries
            .entry((tenant_id.to_string(), project_id.to_string()))
            .or_default()
            .insert(agent_id.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn remove(&self, tenant_id: &str, project_id: &str, agent_id: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if let Some(project) = entries.get_mut(&(tenant_id.to_string(), project_id.to_string())) {
            project.remove(agent_id);
        }
        Ok(())
    }

    async fn list(&self, tenant_id: &str, project_id: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let Some(project) = entries.get_mut(&(tenant_id.to_string(), project_id.to_string()))
        else {
            return Ok(Vec::new());
        };
        project.retain(|_, expiry| *expiry > now);
        let mut agents: Vec<String> = project.keys().cloned().collect();
        agents.sort();
        Ok(agents)
    }

    async fn is_present(
        &self,
        tenant_id: &str,
        project_id: &str,
        agent_id: &str,
    ) -> Result<bool> {
        let now = Instant::now();
        let entries = self.entries.lock();
        Ok(entries
            .get(&(tenant_id.to_string(), project_id.to_string()))
            .and_then(|project| project.get(agent_id))
            .map(|expiry| *expiry > now)
            .unwrap_or(false))
    }
}

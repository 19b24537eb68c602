//! Agent selection and notification for newly persisted jobs.
//!
//! Selection pipeline: presence list for the job's (tenant, project),
//! then targeting, then the fan-out cap. Presence does not imply idle;
//! a busy agent simply refuses the lease, so over-notification is cheap.
//! Publish failures never fail scheduling: the job stays `pending` and a
//! later wave or poll picks it up.

pub mod reaper;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::broker::{agent_channel, AgentMessage, Publisher};
use crate::error::Result;
use crate::presence::PresenceStore;
use crate::store::{Job, Scope, Store};

const DEFAULT_FANOUT_CAP: usize = 10;

/// Which agents a job is aimed at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Target {
    /// A single agent id; empty result if it is not present.
    Agent { value: String },
    /// Agents whose stored labels are a superset of the given mapping.
    Label { labels: BTreeMap<String, String> },
    /// Opaque predicate, pass-through in v1.
    Query { value: String },
    /// Every currently-present agent in the project.
    #[default]
    Any,
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    presence: Arc<dyn PresenceStore>,
    publisher: Arc<dyn Publisher>,
    fanout_cap: usize,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        presence: Arc<dyn PresenceStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            store,
            presence,
            publisher,
            fanout_cap: DEFAULT_FANOUT_CAP,
        }
    }

    pub fn with_fanout_cap(mut self, cap: usize) -> Self {
        self.fanout_cap = cap;
        self
    }

    /// Notifies up to `fanout_cap` eligible agents that `job` is
    /// available. Returns how many were notified; zero is not an error.
    pub async fn schedule(&self, scope: &Scope, job: &Job, target: &Target) -> Result<usize> {
        let present = self
            .presence
            .list(&job.tenant_id, &job.project_id)
            .await?;
        if present.is_empty() {
            tracing::debug!(job_id = %job.job_id, project_id = %job.project_id, "No agents present, job stays pending");
            return Ok(0);
        }

        let mut selected = self
            .apply_target(scope, &job.project_id, target, present)
            .await?;
        selected.truncate(self.fanout_cap);

        let message = AgentMessage::JobAvailable { job_id: job.job_id };
        let mut notified = 0;
        for agent_id in &selected {
            let channel = agent_channel(&job.tenant_id, agent_id);
            match self.publisher.publish(&channel, &message).await {
                Ok(()) => notified += 1,
                Err(err) => {
                    tracing::warn!(job_id = %job.job_id, agent_id = %agent_id, error = %err, "Failed to notify agent");
                }
            }
        }

        tracing::info!(job_id = %job.job_id, notified, candidates = selected.len(), "Job scheduled");
        Ok(notified)
    }

    async fn apply_target(
        &self,
        scope: &Scope,
        project_id: &str,
        target: &Target,
        present: Vec<String>,
    ) -> Result<Vec<String>> {
        match target {
            Target::Agent { value } => Ok(if present.iter().any(|a| a == value) {
                vec![value.clone()]
            } else {
                Vec::new()
            }),
            Target::Label { labels } => {
                let mut matched = Vec::new();
                for agent_id in present {
                    let Ok(record) = self.store.get_agent(scope, project_id, &agent_id).await
                    else {
                        // Present but never registered: skip it for
                        // label targeting.
                        continue;
                    };
                    let superset = labels
                        .iter()
                        .all(|(k, v)| record.labels.get(k) == Some(v));
                    if superset {
                        matched.push(agent_id);
                    }
                }
                Ok(matched)
            }
            Target::Query { .. } | Target::Any => Ok(present),
        }
    }
}

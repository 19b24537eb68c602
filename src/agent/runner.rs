//! The agent run loop: register, heartbeat, and one lease -> execute ->
//! complete cycle per `job_available`.
//!
//! Every incoming notification gets its own task; the state machine is
//! the backpressure. A notification that arrives while a workflow is
//! executing fails the idle -> leasing transition and is dropped, which
//! is exactly the refusal the scheduler counts on.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::{AgentMessage, MessageSource};
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::workflow::{Executor, Workflow};

use super::client::{ControlPlaneClient, LeaseResponse, LeasedJob, RegisterRequest};
use super::state::{AgentState, StateMachine};
use super::upgrade::{UpgradeInfo, Upgrader};

const COMPLETION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const HANDLER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Agent {
    config: AgentConfig,
    state: StateMachine,
    client: ControlPlaneClient,
    executor: Executor,
    upgrader: Option<Upgrader>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        client: ControlPlaneClient,
        executor: Executor,
        upgrader: Option<Upgrader>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: StateMachine::new(),
            client,
            executor,
            upgrader,
        })
    }

    pub fn state(&self) -> AgentState {
        self.state.current()
    }

    /// Registers, then dispatches broker messages until shutdown or the
    /// connection drops. Returns `Ok` after a clean shutdown or a staged
    /// upgrade (the process exits and the service manager restarts it).
    pub async fn run(
        self: Arc<Self>,
        mut source: Box<dyn MessageSource>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        self.state.transition(AgentState::Registering)?;
        let register = RegisterRequest {
            agent_id: self.config.agent_id.clone(),
            project_id: self.config.project_id.clone(),
            os: self.config.os.clone(),
            labels: self.config.labels.clone(),
        };
        if let Err(err) = self.client.register(&register).await {
            // Terminal per attempt; the process exits and retries from
            // a fresh start.
            let _ = self.state.transition(AgentState::Unregistered);
            return Err(err);
        }
        self.state.transition(AgentState::Idle)?;
        tracing::info!(agent_id = %self.config.agent_id, project_id = %self.config.project_id, "Agent registered");

        let heartbeat = {
            let agent = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { agent.heartbeat_loop(shutdown).await })
        };

        let mut handlers = JoinSet::new();
        let outcome = loop {
            // Completed handlers are reaped opportunistically so the set
            // does not grow over a long-lived process.
            while handlers.try_join_next().is_some() {}

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested");
                    break Ok(());
                }
                message = source.next() => match message {
                    None => break Err(Error::Transport("broker connection closed".to_string())),
                    Some(AgentMessage::JobAvailable { job_id }) => {
                        let agent = self.clone();
                        let shutdown = shutdown.clone();
                        handlers.spawn(async move {
                            agent.handle_job_available(job_id, shutdown).await;
                        });
                    }
                    Some(AgentMessage::CancelJob { job_id }) => {
                        let agent = self.clone();
                        let shutdown = shutdown.clone();
                        handlers.spawn(async move {
                            agent.handle_cancel(job_id, shutdown).await;
                        });
                    }
                    Some(AgentMessage::UpgradeAvailable { version, url, sha256, signature, key_id }) => {
                        let info = UpgradeInfo { version, url, sha256, signature, key_id };
                        if self.handle_upgrade(&info).await {
                            break Ok(());
                        }
                    }
                    Some(AgentMessage::Heartbeat { .. }) => {}
                }
            }
        };

        // Let in-flight cycles report their completions before exiting.
        let drain = async {
            while handlers.join_next().await.is_some() {}
        };
        if tokio::time::timeout(HANDLER_DRAIN_TIMEOUT, drain).await.is_err() {
            tracing::warn!("In-flight job handlers did not drain in time");
        }
        heartbeat.abort();
        outcome
    }

    async fn heartbeat_loop(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    let state = self.state.current();
                    let active = u32::from(state == AgentState::Executing);
                    if let Err(err) = self.client.heartbeat(&state.to_string(), active).await {
                        tracing::warn!(error = %err, "Heartbeat failed");
                    }
                }
            }
        }
    }

    async fn handle_job_available(&self, job_id: Uuid, shutdown: CancellationToken) {
        if let Err(err) = self.state.transition(AgentState::Leasing) {
            tracing::debug!(job_id = %job_id, error = %err, "Not idle, ignoring job_available");
            return;
        }

        // Fan-out sends the same notification to several agents at once;
        // a little jitter keeps the lease CAS from seeing them all in
        // the same instant.
        let jitter = rand::thread_rng().gen_range(0..100u64);
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let job = match self.client.lease(job_id).await {
            Ok(LeaseResponse::Leased(job)) => job,
            Ok(LeaseResponse::NotAvailable) => {
                tracing::debug!(job_id = %job_id, "Job no longer available");
                let _ = self.state.transition(AgentState::Idle);
                return;
            }
            Ok(LeaseResponse::Conflict) => {
                tracing::debug!(job_id = %job_id, "Lost the lease race");
                let _ = self.state.transition(AgentState::Idle);
                return;
            }
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "Lease attempt failed");
                let _ = self.state.transition(AgentState::Idle);
                return;
            }
        };

        if self.state.transition(AgentState::Executing).is_err() {
            // Cannot happen from leasing; bail without executing if the
            // table ever disagrees.
            let _ = self.state.transition(AgentState::Idle);
            return;
        }
        tracing::info!(job_id = %job_id, "Lease acquired, executing workflow");

        let success = self.execute_leased(&job, &shutdown).await;
        self.report_completion(job.job_id, success, &shutdown).await;
        let _ = self.state.transition(AgentState::Idle);
    }

    async fn execute_leased(&self, job: &LeasedJob, shutdown: &CancellationToken) -> bool {
        let workflow = match Workflow::from_payload(&job.payload) {
            Ok(workflow) => workflow,
            Err(err) => {
                tracing::warn!(job_id = %job.job_id, error = %err, "Job payload is not a valid workflow");
                return false;
            }
        };
        match self.executor.run(&workflow, shutdown.child_token()).await {
            Ok(result) => {
                tracing::info!(
                    job_id = %job.job_id,
                    workflow = %result.name,
                    success = result.success,
                    tasks = result.tasks.len(),
                    "Workflow finished"
                );
                result.success
            }
            Err(err) => {
                tracing::warn!(job_id = %job.job_id, error = %err, "Workflow rejected");
                false
            }
        }
    }

    async fn report_completion(&self, job_id: Uuid, success: bool, shutdown: &CancellationToken) {
        let completion = self.client.complete(job_id, success);
        let result = if shutdown.is_cancelled() {
            // Shutting down: a short window so the server can free the
            // lease, then give up and let the reaper repair it.
            match tokio::time::timeout(COMPLETION_DRAIN_TIMEOUT, completion).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(COMPLETION_DRAIN_TIMEOUT)),
            }
        } else {
            completion.await
        };
        if let Err(err) = result {
            // Potentially delivered; the owner guard makes a retry or a
            // reap safe either way.
            tracing::warn!(job_id = %job_id, error = %err, "Completion may not have reached the server");
        }
    }

    /// Cancel reuses the leasing path to fetch authoritative state: if
    /// the job is still pending we lease it and retire it as failed. A
    /// cancel during execution is logged and ignored (v1 stub).
    async fn handle_cancel(&self, job_id: Uuid, shutdown: CancellationToken) {
        if let Err(err) = self.state.transition(AgentState::Leasing) {
            tracing::info!(job_id = %job_id, error = %err, "Cancel ignored while busy");
            return;
        }
        match self.client.lease(job_id).await {
            Ok(LeaseResponse::Leased(job)) => {
                tracing::info!(job_id = %job.job_id, "Cancelled job retired as failed");
                self.report_completion(job.job_id, false, &shutdown).await;
            }
            Ok(_) => {
                tracing::debug!(job_id = %job_id, "Cancelled job already settled elsewhere");
            }
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "Cancel lease attempt failed");
            }
        }
        let _ = self.state.transition(AgentState::Idle);
    }

    /// Returns true when an upgrade was staged and the process should
    /// exit for restart.
    async fn handle_upgrade(&self, info: &UpgradeInfo) -> bool {
        let Some(upgrader) = &self.upgrader else {
            tracing::info!(version = %info.version, "Upgrade notice ignored, no upgrader configured");
            return false;
        };
        if let Err(err) = self.state.transition(AgentState::Upgrading) {
            tracing::info!(version = %info.version, error = %err, "Upgrade deferred, agent busy");
            return false;
        }
        match upgrader.apply(info).await {
            Ok(()) => {
                let _ = self.state.transition(AgentState::Unregistered);
                true
            }
            Err(err) => {
                tracing::warn!(version = %info.version, error = %err, "Upgrade failed");
                let _ = self.state.transition(AgentState::Idle);
                false
            }
        }
    }
}

//! Durable state: jobs, projects, agents, audit log, role bindings.
//!
//! The relational driver is an external collaborator; [`Store`] is the
//! contract it must meet. [`memory::MemoryStore`] implements the same
//! semantics in process and backs the test harness and single-process mode.
//!
//! Every operation takes a [`Scope`] derived from the calling principal.
//! The scope is the only mechanism preventing cross-tenant access: a store
//! implementation must reject an empty tenant id before touching any row,
//! and must treat rows outside the scope as absent.

pub mod memory;

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Role;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Leased,
    Completed,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Leased => write!(f, "leased"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub tenant_id: String,
    pub project_id: String,
    pub state: JobState,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(tenant_id: &str, project_id: &str, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            project_id: project_id.to_string(),
            state: JobState::Pending,
            lease_owner: None,
            lease_expires_at: None,
            payload,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    pub tenant_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub os: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: Uuid,
    pub tenant_id: String,
    pub project_id: Option<String>,
    pub actor_type: String,
    pub actor_id: String,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(tenant_id: &str, actor_type: &str, actor_id: &str, action: &str) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            project_id: None,
            actor_type: actor_type.to_string(),
            actor_id: actor_id.to_string(),
            action: action.to_string(),
            resource_type: None,
            resource_id: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn project(mut self, project_id: &str) -> Self {
        self.project_id = Some(project_id.to_string());
        self
    }

    pub fn resource(mut self, resource_type: &str, resource_id: &str) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Optional filters for audit listing.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub project_id: Option<String>,
    pub actor_id: Option<String>,
    pub action: Option<String>,
}

/// Tenant boundary attached to every store call.
///
/// A row is visible iff its tenant matches and its project is in
/// `project_ids`. An empty project list grants access to nothing: the
/// guard always enumerates accessible projects explicitly, so an empty
/// list means the principal has none.
#[derive(Debug, Clone)]
pub struct Scope {
    pub tenant_id: String,
    pub project_ids: Vec<String>,
}

impl Scope {
    pub fn new(tenant_id: impl Into<String>, project_ids: Vec<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            project_ids,
        }
    }

    /// Rejects scopes that could not have come from a validated principal.
    /// Must be called before any row access.
    pub fn validate(&self) -> Result<()> {
        if self.tenant_id.is_empty() {
            return Err(Error::InvalidInput("tenant_id is required".to_string()));
        }
        Ok(())
    }

    pub fn permits(&self, tenant_id: &str, project_id: &str) -> bool {
        self.tenant_id == tenant_id && self.permits_project(project_id)
    }

    pub fn permits_project(&self, project_id: &str) -> bool {
        self.project_ids.iter().any(|p| p == project_id)
    }
}

/// One page of a forward-only cursor listing. `next_cursor` is the primary
/// key of the last returned row, absent on the final page.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Outcome of the lease CAS. `Conflict` means another lessee holds a live
/// lease (the caller lost the race); `NotAvailable` means the job is
/// absent, terminal, or invisible to the scope.
#[derive(Debug, Clone)]
pub enum LeaseOutcome {
    Leased(Job),
    Conflict,
    NotAvailable,
}

/// Outcome of completion. `NotOwner` covers stale and reaped leases: the
/// update matched no row, so a re-leased instance is not overwritten.
#[derive(Debug, Clone)]
pub enum CompleteOutcome {
    Done(Job),
    NotOwner,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_project(&self, project: Project) -> Result<()>;
    async fn list_projects(
        &self,
        scope: &Scope,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Page<Project>>;

    async fn create_job(&self, scope: &Scope, job: Job) -> Result<()>;
    async fn get_job(&self, scope: &Scope, job_id: Uuid) -> Result<Job>;
    async fn list_jobs(
        &self,
        scope: &Scope,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Page<Job>>;

    /// Atomic pending -> leased transition. A lease whose deadline has
    /// passed is reaped inline and re-granted. At most one caller per
    /// lease generation observes `Leased`.
    async fn lease_job(
        &self,
        scope: &Scope,
        job_id: Uuid,
        agent_id: &str,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome>;

    /// Terminal transition guarded by `lease_owner = agent AND state =
    /// leased`. Idempotent from the caller's view: a second call returns
    /// `NotOwner` without further state change.
    async fn complete_job(
        &self,
        scope: &Scope,
        job_id: Uuid,
        agent_id: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<CompleteOutcome>;

    /// Reaper pass: every job in `leased` whose deadline has passed goes
    /// back to `pending` with owner and expiry cleared. System-level (no
    /// scope); idempotent and safe to run from multiple instances.
    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>>;

    async fn upsert_agent(&self, scope: &Scope, agent: AgentRecord) -> Result<()>;
    async fn get_agent(
        &self,
        scope: &Scope,
        project_id: &str,
        agent_id: &str,
    ) -> Result<AgentRecord>;
    async fn list_agents(
        &self,
        scope: &Scope,
        project_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Page<AgentRecord>>;

    async fn append_audit(&self, entry: AuditEntry) -> Result<()>;
    async fn list_audit(
        &self,
        scope: &Scope,
        filter: &AuditFilter,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Page<AuditEntry>>;

    async fn bind_role(
        &self,
        tenant_id: &str,
        user_id: &str,
        project_id: &str,
        role: Role,
    ) -> Result<()>;
    async fn project_roles(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<HashMap<String, Vec<Role>>>;
}

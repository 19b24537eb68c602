//! In-memory [`Store`] with the same visibility and CAS semantics a SQL
//! driver must provide. Single-row mutations are serialized by one lock,
//! which stands in for the row-level transaction in `lease_job`.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::auth::Role;
use crate::error::{Error, Result};

use super::{
    AgentRecord, AuditEntry, AuditFilter, CompleteOutcome, Job, JobState, LeaseOutcome, Page,
    Project, Scope, Store,
};

#[derive(Default)]
struct Inner {
    // BTreeMaps keep primary-key order so cursor pagination matches the
    // relational ORDER BY contract.
    projects: BTreeMap<(String, String), Project>,
    jobs: BTreeMap<Uuid, Job>,
    agents: BTreeMap<(String, String, String), AgentRecord>,
    audit: BTreeMap<Uuid, AuditEntry>,
    roles: HashMap<(String, String), HashMap<String, Vec<Role>>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn job_visible(scope: &Scope, job: &Job) -> bool {
    scope.permits(&job.tenant_id, &job.project_id)
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_project(&self, project: Project) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .projects
            .insert((project.tenant_id.clone(), project.project_id.clone()), project);
        Ok(())
    }

    async fn list_projects(
        &self,
        scope: &Scope,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Page<Project>> {
        scope.validate()?;
        let inner = self.inner.read();
        let start = match cursor {
            Some(c) => Bound::Excluded((scope.tenant_id.clone(), c.to_string())),
            None => Bound::Included((scope.tenant_id.clone(), String::new())),
        };
        let mut items = Vec::new();
        let mut next_cursor = None;
        for ((tenant, _), project) in inner.projects.range((start, Bound::Unbounded)) {
            if tenant != &scope.tenant_id {
                break;
            }
            if !scope.permits(&project.tenant_id, &project.project_id) {
                continue;
            }
            if items.len() < limit {
                items.push(project.clone());
            } else {
                next_cursor = items.last().map(|p: &Project| p.project_id.clone());
                break;
            }
        }
        Ok(Page { items, next_cursor })
    }

    async fn create_job(&self, scope: &Scope, job: Job) -> Result<()> {
        scope.validate()?;
        if !scope.permits(&job.tenant_id, &job.project_id) {
            return Err(Error::Forbidden(format!(
                "project {} not in scope",
                job.project_id
            )));
        }
        let mut inner = self.inner.write();
        inner.jobs.insert(job.job_id, job);
        Ok(())
    }

    async fn get_job(&self, scope: &Scope, job_id: Uuid) -> Result<Job> {
        scope.validate()?;
        let inner = self.inner.read();
        inner
            .jobs
            .get(&job_id)
            .filter(|job| job_visible(scope, job))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))
    }

    async fn list_jobs(
        &self,
        scope: &Scope,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Page<Job>> {
        scope.validate()?;
        let start = match cursor {
            Some(c) => {
                let id = Uuid::parse_str(c)
                    .map_err(|_| Error::InvalidInput(format!("bad cursor: {c}")))?;
                Bound::Excluded(id)
            }
            None => Bound::Unbounded,
        };
        let inner = self.inner.read();
        let mut items = Vec::new();
        let mut next_cursor = None;
        for job in inner.jobs.range((start, Bound::Unbounded)).map(|(_, j)| j) {
            if !job_visible(scope, job) {
                continue;
            }
            if items.len() < limit {
                items.push(job.clone());
            } else {
                next_cursor = items.last().map(|j: &Job| j.job_id.to_string());
                break;
            }
        }
        Ok(Page { items, next_cursor })
    }

    async fn lease_job(
        &self,
        scope: &Scope,
        job_id: Uuid,
        agent_id: &str,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome> {
        scope.validate()?;
        let mut inner = self.inner.write();
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(LeaseOutcome::NotAvailable);
        };
        if !scope.permits(&job.tenant_id, &job.project_id) {
            // Out-of-scope rows are indistinguishable from absent ones.
            return Ok(LeaseOutcome::NotAvailable);
        }
        let eligible = match job.state {
            JobState::Pending => true,
            // Inline reap: an expired lease is up for grabs again.
            JobState::Leased => match job.lease_expires_at {
                Some(expires) if expires < now => true,
                _ => return Ok(LeaseOutcome::Conflict),
            },
            JobState::Completed | JobState::Failed => false,
        };
        if !eligible {
            return Ok(LeaseOutcome::NotAvailable);
        }
        job.state = JobState::Leased;
        job.lease_owner = Some(agent_id.to_string());
        job.lease_expires_at = Some(now + chrono::Duration::from_std(lease_duration).unwrap_or_default());
        job.updated_at = now;
        Ok(LeaseOutcome::Leased(job.clone()))
    }

    async fn complete_job(
        &self,
        scope: &Scope,
        job_id: Uuid,
        agent_id: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<CompleteOutcome> {
        scope.validate()?;
        let mut inner = self.inner.write();
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(CompleteOutcome::NotOwner);
        };
        if !scope.permits(&job.tenant_id, &job.project_id) {
            return Ok(CompleteOutcome::NotOwner);
        }
        if job.state != JobState::Leased || job.lease_owner.as_deref() != Some(agent_id) {
            return Ok(CompleteOutcome::NotOwner);
        }
        job.state = if success {
            JobState::Completed
        } else {
            JobState::Failed
        };
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(CompleteOutcome::Done(job.clone()))
    }

    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let mut inner = self.inner.write();
        let mut reaped = Vec::new();
        for job in inner.jobs.values_mut() {
            if job.state == JobState::Leased
                && job.lease_expires_at.map(|t| t < now).unwrap_or(false)
            {
                job.state = JobState::Pending;
                job.lease_owner = None;
                job.lease_expires_at = None;
                job.updated_at = now;
                reaped.push(job.clone());
            }
        }
        Ok(reaped)
    }

    async fn upsert_agent(&self, scope: &Scope, agent: AgentRecord) -> Result<()> {
        scope.validate()?;
        if !scope.permits(&agent.tenant_id, &agent.project_id) {
            return Err(Error::Forbidden(format!(
                "project {} not in scope",
                agent.project_id
            )));
        }
        let mut inner = self.inner.write();
        let key = (
            agent.tenant_id.clone(),
            agent.project_id.clone(),
            agent.agent_id.clone(),
        );
        match inner.agents.get_mut(&key) {
            Some(existing) => {
                existing.os = agent.os;
                existing.labels = agent.labels;
                existing.updated_at = agent.updated_at;
            }
            None => {
                inner.agents.insert(key, agent);
            }
        }
        Ok(())
    }

    async fn get_agent(
        &self,
        scope: &Scope,
        project_id: &str,
        agent_id: &str,
    ) -> Result<AgentRecord> {
        scope.validate()?;
        if !scope.permits_project(project_id) {
            return Err(Error::NotFound(format!("agent {agent_id}")));
        }
        let inner = self.inner.read();
        inner
            .agents
            .get(&(
                scope.tenant_id.clone(),
                project_id.to_string(),
                agent_id.to_string(),
            ))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))
    }

    async fn list_agents(
        &self,
        scope: &Scope,
        project_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Page<AgentRecord>> {
        scope.validate()?;
        if !scope.permits_project(project_id) {
            return Ok(Page {
                items: Vec::new(),
                next_cursor: None,
            });
        }
        let inner = self.inner.read();
        let prefix = (scope.tenant_id.clone(), project_id.to_string());
        let start = match cursor {
            Some(c) => Bound::Excluded((prefix.0.clone(), prefix.1.clone(), c.to_string())),
            None => Bound::Included((prefix.0.clone(), prefix.1.clone(), String::new())),
        };
        let mut items = Vec::new();
        let mut next_cursor = None;
        for ((tenant, project, _), agent) in inner.agents.range((start, Bound::Unbounded)) {
            if tenant != &prefix.0 || project != &prefix.1 {
                break;
            }
            if items.len() < limit {
                items.push(agent.clone());
            } else {
                next_cursor = items.last().map(|a: &AgentRecord| a.agent_id.clone());
                break;
            }
        }
        Ok(Page { items, next_cursor })
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        if entry.tenant_id.is_empty() {
            return Err(Error::InvalidInput("tenant_id is required".to_string()));
        }
        let mut inner = self.inner.write();
        inner.audit.insert(entry.audit_id, entry);
        Ok(())
    }

    async fn list_audit(
        &self,
        scope: &Scope,
        filter: &AuditFilter,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Page<AuditEntry>> {
        scope.validate()?;
        let start = match cursor {
            Some(c) => {
                let id = Uuid::parse_str(c)
                    .map_err(|_| Error::InvalidInput(format!("bad cursor: {c}")))?;
                Bound::Excluded(id)
            }
            None => Bound::Unbounded,
        };
        let inner = self.inner.read();
        let mut items = Vec::new();
        let mut next_cursor = None;
        for (_, entry) in inner.audit.range((start, Bound::Unbounded)) {
            if entry.tenant_id != scope.tenant_id {
                continue;
            }
            // Entries with a project are visible only inside the scope;
            // tenant-wide entries (no project) are visible to the tenant.
            if let Some(project) = &entry.project_id {
                if !scope.permits(&entry.tenant_id, project) {
                    continue;
                }
            }
            if let Some(p) = &filter.project_id {
                if entry.project_id.as_deref() != Some(p.as_str()) {
                    continue;
                }
            }
            if let Some(a) = &filter.actor_id {
                if &entry.actor_id != a {
                    continue;
                }
            }
            if let Some(a) = &filter.action {
                if &entry.action != a {
                    continue;
                }
            }
            if items.len() < limit {
                items.push(entry.clone());
            } else {
                next_cursor = items.last().map(|e: &AuditEntry| e.audit_id.to_string());
                break;
            }
        }
        Ok(Page { items, next_cursor })
    }

    async fn bind_role(
        &self,
        tenant_id: &str,
        user_id: &str,
        project_id: &str,
        role: Role,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .roles
            .entry((tenant_id.to_string(), user_id.to_string()))
            .or_default()
            .entry(project_id.to_string())
            .or_default()
            .push(role);
        Ok(())
    }

    async fn project_roles(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<HashMap<String, Vec<Role>>> {
        let inner = self.inner.read();
        Ok(inner
            .roles
            .get(&(tenant_id.to_string(), user_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

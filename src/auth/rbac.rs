use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::{Scope, Store};

use super::Principal;

/// Closed permission set. There is no wildcard and no admin bypass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    JobRun,
    JobRead,
    JobCancel,
    AgentRead,
    AgentUpgrade,
    ProjectAdmin,
    ArtifactWrite,
    AuditRead,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::JobRun => "job:run",
            Permission::JobRead => "job:read",
            Permission::JobCancel => "job:cancel",
            Permission::AgentRead => "agent:read",
            Permission::AgentUpgrade => "agent:upgrade",
            Permission::ProjectAdmin => "project:admin",
            Permission::ArtifactWrite => "artifact:write",
            Permission::AuditRead => "audit:read",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
}

impl Role {
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::Admin => &[
                Permission::JobRun,
                Permission::JobRead,
                Permission::JobCancel,
                Permission::AgentRead,
                Permission::AgentUpgrade,
                Permission::ProjectAdmin,
                Permission::ArtifactWrite,
                Permission::AuditRead,
            ],
            Role::Operator => &[Permission::JobRun, Permission::JobRead, Permission::AgentRead],
            Role::Viewer => &[Permission::JobRead, Permission::AgentRead],
        }
    }

    pub fn grants(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "operator" => Ok(Role::Operator),
            "viewer" => Ok(Role::Viewer),
            other => Err(Error::InvalidInput(format!("unknown role: {other}"))),
        }
    }
}

/// Decides whether a principal may touch a (tenant, project) row and
/// enumerates the projects it can see. User roles are resolved from the
/// store per call; agents are implicitly bound to their single project.
pub struct Guard {
    store: Arc<dyn Store>,
}

impl Guard {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn authorize(
        &self,
        principal: &Principal,
        project_id: &str,
        permission: Permission,
    ) -> Result<()> {
        match principal {
            Principal::Agent {
                project_id: own_project,
                agent_id,
                ..
            } => {
                if project_id != own_project {
                    return Err(Error::Forbidden(format!(
                        "agent {agent_id} not authorized for project {project_id}"
                    )));
                }
                // Agents act on their own project through the lease,
                // complete, and register-self paths, which require an
                // agent principal directly. Of the role-backed
                // permissions they hold only the read ones.
                match permission {
                    Permission::JobRead | Permission::AgentRead => Ok(()),
                    _ => Err(Error::Forbidden(format!(
                        "agents do not hold {}",
                        permission.as_str()
                    ))),
                }
            }
            Principal::User {
                user_id, tenant_id, ..
            } => {
                let roles = self.store.project_roles(tenant_id, user_id).await?;
                let granted = roles
                    .get(project_id)
                    .map(|rs| rs.iter().any(|r| r.grants(permission)))
                    .unwrap_or(false);
                if granted {
                    Ok(())
                } else {
                    Err(Error::Forbidden(format!(
                        "permission {} denied for project {project_id}",
                        permission.as_str()
                    )))
                }
            }
        }
    }

    pub async fn accessible_projects(&self, principal: &Principal) -> Result<Vec<String>> {
        match principal {
            Principal::Agent { project_id, .. } => Ok(vec![project_id.clone()]),
            Principal::User {
                user_id, tenant_id, ..
            } => {
                let roles: HashMap<String, Vec<Role>> =
                    self.store.project_roles(tenant_id, user_id).await?;
                let mut projects: Vec<String> = roles.into_keys().collect();
                projects.sort();
                Ok(projects)
            }
        }
    }

    /// Query scope for the principal: its tenant plus every project it
    /// may access.
    pub async fn scope_for(&self, principal: &Principal) -> Result<Scope> {
        let projects = self.accessible_projects(principal).await?;
        Ok(Scope::new(principal.tenant_id(), projects))
    }

    /// The lease/complete/register endpoints are agent-only.
    pub fn require_agent<'a>(&self, principal: &'a Principal) -> Result<(&'a str, &'a str)> {
        match principal {
            Principal::Agent {
                agent_id,
                project_id,
                ..
            } => Ok((agent_id.as_str(), project_id.as_str())),
            Principal::User { .. } => Err(Error::Forbidden(
                "only agents may call this endpoint".to_string(),
            )),
        }
    }
}

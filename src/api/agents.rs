use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::auth::Permission;
use crate::broker::{agent_channel, AgentMessage};
use crate::error::Error;
use crate::store::{AgentRecord, AuditEntry};

use super::{ApiError, ApiResult, AppState, AuthContext};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub agent_id: String,
    pub project_id: String,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

pub async fn register(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<StatusCode> {
    let (agent_id, project_id) = state.guard.require_agent(&auth.principal)?;
    // Identity comes from the token, not the body; a mismatched body is
    // a spoof attempt.
    if req.project_id != project_id {
        return Err(ApiError(Error::Forbidden(format!(
            "agent is bound to project {project_id}"
        ))));
    }
    let agent_id = agent_id.to_string();
    let project_id = project_id.to_string();
    let tenant_id = auth.principal.tenant_id().to_string();
    let scope = state.guard.scope_for(&auth.principal).await?;

    let now = Utc::now();
    state
        .store
        .upsert_agent(
            &scope,
            AgentRecord {
                agent_id: agent_id.clone(),
                tenant_id: tenant_id.clone(),
                project_id: project_id.clone(),
                os: req.os,
                labels: req.labels,
                created_at: now,
                updated_at: now,
            },
        )
        .await?;

    state
        .presence
        .announce(&tenant_id, &project_id, &agent_id, state.presence_ttl)
        .await?;

    state
        .store
        .append_audit(
            AuditEntry::new(&tenant_id, "agent", &agent_id, "agent.register")
                .project(&project_id)
                .resource("agent", &agent_id),
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub active_jobs: Option<u32>,
}

/// Refreshes the agent's presence TTL. This is how liveness reaches the
/// scheduler.
pub async fn heartbeat(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<StatusCode> {
    let (agent_id, project_id) = state.guard.require_agent(&auth.principal)?;
    state
        .presence
        .announce(
            auth.principal.tenant_id(),
            project_id,
            agent_id,
            state.presence_ttl,
        )
        .await?;
    tracing::debug!(
        agent_id,
        state = req.state.as_deref().unwrap_or("unknown"),
        active_jobs = req.active_jobs.unwrap_or(0),
        "Heartbeat"
    );
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
pub struct UpgradeRequest {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub key_id: Option<String>,
}

/// Asks an agent to upgrade itself. Accepted and forwarded when the
/// request carries artifact details; otherwise just accepted (v1 stub).
pub async fn upgrade(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(agent_id): Path<String>,
    body: Option<Json<UpgradeRequest>>,
) -> ApiResult<StatusCode> {
    let scope = state.guard.scope_for(&auth.principal).await?;

    // The path only names the agent; find which accessible project owns
    // it before authorizing against that project.
    let mut owning_project = None;
    for project_id in &scope.project_ids {
        if state
            .store
            .get_agent(&scope, project_id, &agent_id)
            .await
            .is_ok()
        {
            owning_project = Some(project_id.clone());
            break;
        }
    }
    let project_id = owning_project
        .ok_or_else(|| ApiError(Error::NotFound(format!("agent {agent_id}"))))?;

    state
        .guard
        .authorize(&auth.principal, &project_id, Permission::AgentUpgrade)
        .await?;

    let req = body.map(|Json(req)| req).unwrap_or_default();
    if let (Some(version), Some(url), Some(sha256), Some(signature), Some(key_id)) =
        (req.version, req.url, req.sha256, req.signature, req.key_id)
    {
        let message = AgentMessage::UpgradeAvailable {
            version,
            url,
            sha256,
            signature,
            key_id,
        };
        let channel = agent_channel(auth.principal.tenant_id(), &agent_id);
        if let Err(err) = state.publisher.publish(&channel, &message).await {
            tracing::warn!(agent_id = %agent_id, error = %err, "Failed to publish upgrade notice");
        }
    }

    let (actor_type, actor_id) = auth.principal.actor();
    state
        .store
        .append_audit(
            AuditEntry::new(auth.principal.tenant_id(), actor_type, actor_id, "agent.upgrade")
                .project(&project_id)
                .resource("agent", &agent_id),
        )
        .await?;

    Ok(StatusCode::ACCEPTED)
}

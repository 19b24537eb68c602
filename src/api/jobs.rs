use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Permission;
use crate::error::Error;
use crate::scheduler::Target;
use crate::store::{AuditEntry, CompleteOutcome, Job, LeaseOutcome};
use crate::workflow::Workflow;

use super::{ApiError, ApiResult, AppState, AuthContext};

#[derive(Deserialize)]
pub struct CreateJobRequest {
    pub project_id: String,
    pub workflow: serde_json::Value,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub target: Option<Target>,
}

#[derive(Serialize)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub tenant_id: String,
    pub project_id: String,
    pub state: String,
}

pub async fn create(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateJobRequest>,
) -> ApiResult<Response> {
    if req.project_id.is_empty() {
        return Err(Error::InvalidInput("project_id is required".to_string()).into());
    }
    // Reject undecodable workflow documents before persisting anything.
    Workflow::from_payload(&req.workflow)?;

    state
        .guard
        .authorize(&auth.principal, &req.project_id, Permission::JobRun)
        .await?;
    let scope = state.guard.scope_for(&auth.principal).await?;

    let job = Job::new(auth.principal.tenant_id(), &req.project_id, req.workflow);
    state.store.create_job(&scope, job.clone()).await?;

    let (actor_type, actor_id) = auth.principal.actor();
    state
        .store
        .append_audit(
            AuditEntry::new(auth.principal.tenant_id(), actor_type, actor_id, "job.create")
                .project(&req.project_id)
                .resource("job", &job.job_id.to_string()),
        )
        .await?;

    // `agent_id` is shorthand for a single-agent target.
    let target = match (req.target, req.agent_id) {
        (Some(target), _) => target,
        (None, Some(agent_id)) => Target::Agent { value: agent_id },
        (None, None) => Target::Any,
    };
    if let Err(err) = state.scheduler.schedule(&scope, &job, &target).await {
        // The job stays pending; a later wave picks it up.
        tracing::warn!(job_id = %job.job_id, error = %err, "Scheduling failed");
    }

    let body = Json(CreateJobResponse {
        job_id: job.job_id,
        tenant_id: job.tenant_id,
        project_id: job.project_id,
        state: job.state.to_string(),
    });
    Ok((StatusCode::CREATED, body).into_response())
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListJobsResponse>> {
    let scope = state.guard.scope_for(&auth.principal).await?;
    let page = state
        .store
        .list_jobs(&scope, state.page_limit, query.cursor.as_deref())
        .await?;
    Ok(Json(ListJobsResponse {
        jobs: page.items,
        next_cursor: page.next_cursor,
    }))
}

#[derive(Serialize)]
pub struct LeasedJobResponse {
    pub job_id: Uuid,
    pub tenant_id: String,
    pub project_id: String,
    pub state: String,
    pub payload: serde_json::Value,
}

pub async fn lease(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Response> {
    let (agent_id, _project) = state.guard.require_agent(&auth.principal)?;
    let agent_id = agent_id.to_string();
    let scope = state.guard.scope_for(&auth.principal).await?;

    let outcome = state
        .store
        .lease_job(&scope, job_id, &agent_id, state.lease_duration, Utc::now())
        .await?;

    match outcome {
        LeaseOutcome::Leased(job) => {
            state
                .store
                .append_audit(
                    AuditEntry::new(auth.principal.tenant_id(), "agent", &agent_id, "job.lease")
                        .project(&job.project_id)
                        .resource("job", &job.job_id.to_string()),
                )
                .await?;
            Ok(Json(LeasedJobResponse {
                job_id: job.job_id,
                tenant_id: job.tenant_id,
                project_id: job.project_id,
                state: job.state.to_string(),
                payload: job.payload,
            })
            .into_response())
        }
        LeaseOutcome::NotAvailable => Ok(StatusCode::NO_CONTENT.into_response()),
        LeaseOutcome::Conflict => Err(ApiError(Error::Conflict(format!(
            "job {job_id} is already leased"
        )))),
    }
}

#[derive(Deserialize)]
pub struct CompleteJobRequest {
    pub success: bool,
}

pub async fn complete(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(job_id): Path<Uuid>,
    Json(req): Json<CompleteJobRequest>,
) -> ApiResult<StatusCode> {
    let (agent_id, _project) = state.guard.require_agent(&auth.principal)?;
    let agent_id = agent_id.to_string();
    let scope = state.guard.scope_for(&auth.principal).await?;

    let outcome = state
        .store
        .complete_job(&scope, job_id, &agent_id, req.success, Utc::now())
        .await?;

    match outcome {
        CompleteOutcome::Done(job) => {
            state
                .store
                .append_audit(
                    AuditEntry::new(auth.principal.tenant_id(), "agent", &agent_id, "job.complete")
                        .project(&job.project_id)
                        .resource("job", &job.job_id.to_string())
                        .metadata(serde_json::json!({ "success": req.success })),
                )
                .await?;
            Ok(StatusCode::NO_CONTENT)
        }
        // Stale or reaped lease: the completion is rejected so a
        // re-leased instance is not overwritten.
        CompleteOutcome::NotOwner => Err(ApiError(Error::Forbidden(format!(
            "agent {agent_id} does not own the lease on job {job_id}"
        )))),
    }
}

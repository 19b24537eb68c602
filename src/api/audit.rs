use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::Permission;
use crate::error::Error;
use crate::store::{AuditEntry, AuditFilter, Scope};

use super::{ApiError, ApiResult, AppState, AuthContext};

#[derive(Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ListAuditResponse {
    pub entries: Vec<AuditEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<ListAuditResponse>> {
    // Audit read is restricted to projects where the caller holds
    // audit:read; agents hold it nowhere.
    let accessible = state.guard.accessible_projects(&auth.principal).await?;
    let mut readable = Vec::new();
    for project_id in accessible {
        if state
            .guard
            .authorize(&auth.principal, &project_id, Permission::AuditRead)
            .await
            .is_ok()
        {
            readable.push(project_id);
        }
    }
    if readable.is_empty() {
        return Err(ApiError(Error::Forbidden(
            "audit:read is not granted on any project".to_string(),
        )));
    }
    let scope = Scope::new(auth.principal.tenant_id(), readable);

    let filter = AuditFilter {
        project_id: query.project_id,
        actor_id: query.actor_id,
        action: query.action,
    };
    let page = state
        .store
        .list_audit(&scope, &filter, state.page_limit, query.cursor.as_deref())
        .await?;
    Ok(Json(ListAuditResponse {
        entries: page.items,
        next_cursor: page.next_cursor,
    }))
}

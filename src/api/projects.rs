use axum::extract::{Query, State};
use axum::Json;
use serde::Serialize;

use crate::store::Project;

use super::jobs::ListQuery;
use super::{ApiResult, AppState, AuthContext};

#[derive(Serialize)]
pub struct ListProjectsResponse {
    pub projects: Vec<Project>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListProjectsResponse>> {
    let scope = state.guard.scope_for(&auth.principal).await?;
    let page = state
        .store
        .list_projects(&scope, state.page_limit, query.cursor.as_deref())
        .await?;
    Ok(Json(ListProjectsResponse {
        projects: page.items,
        next_cursor: page.next_cursor,
    }))
}

//! Control-plane HTTP surface.
//!
//! Every `/api` route authenticates a bearer token into a [`Principal`]
//! and derives a query [`Scope`](crate::store::Scope) before touching
//! the store. Handlers map the error taxonomy onto statuses: bad bearer
//! 401, guard denial 403, missing row 404, lease race 409, everything
//! else 500.

mod agents;
mod audit;
mod jobs;
mod projects;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{async_trait, Json, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{Guard, Principal, TokenValidator};
use crate::broker::Publisher;
use crate::error::Error;
use crate::presence::PresenceStore;
use crate::scheduler::Scheduler;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub presence: Arc<dyn PresenceStore>,
    pub scheduler: Arc<Scheduler>,
    pub publisher: Arc<dyn Publisher>,
    pub validator: Arc<TokenValidator>,
    pub guard: Arc<Guard>,
    pub lease_duration: Duration,
    pub presence_ttl: Duration,
    pub page_limit: usize,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/jobs", post(jobs::create).get(jobs::list))
        .route("/jobs/:id/lease", post(jobs::lease))
        .route("/jobs/:id/complete", post(jobs::complete))
        .route("/agents/register", post(agents::register))
        .route("/agents/heartbeat", post(agents::heartbeat))
        .route("/agents/:id/upgrade", post(agents::upgrade))
        .route("/projects", get(projects::list))
        .route("/audit/logs", get(audit::list));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// Validated caller identity, extracted from the bearer token.
pub struct AuthContext {
    pub principal: Principal,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                ApiError(Error::Unauthorized(
                    "missing authorization header".to_string(),
                ))
            })?;
        let claims = state.validator.validate(header).map_err(ApiError)?;
        let principal = Principal::from_claims(&claims).map_err(ApiError)?;
        Ok(Self { principal })
    }
}

/// Taxonomy-to-status adapter.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

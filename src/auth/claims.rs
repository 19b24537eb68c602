use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// JWT payload. Exactly one of `agent_id` / `user_id` is expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn for_agent(agent_id: &str, tenant_id: &str, project_id: &str, ttl_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            user_id: None,
            agent_id: Some(agent_id.to_string()),
            tenant_id: tenant_id.to_string(),
            project_id: Some(project_id.to_string()),
            roles: Vec::new(),
            exp: now + ttl_secs,
            iat: now,
        }
    }

    pub fn for_user(user_id: &str, tenant_id: &str, ttl_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            user_id: Some(user_id.to_string()),
            agent_id: None,
            tenant_id: tenant_id.to_string(),
            project_id: None,
            roles: Vec::new(),
            exp: now + ttl_secs,
            iat: now,
        }
    }
}

/// A validated caller identity.
#[derive(Debug, Clone)]
pub enum Principal {
    Agent {
        agent_id: String,
        tenant_id: String,
        project_id: String,
    },
    User {
        user_id: String,
        tenant_id: String,
    },
}

impl Principal {
    pub fn from_claims(claims: &Claims) -> Result<Self> {
        if claims.tenant_id.is_empty() {
            return Err(Error::Unauthorized("token missing tenant_id".to_string()));
        }
        if let Some(agent_id) = &claims.agent_id {
            let project_id = claims.project_id.clone().ok_or_else(|| {
                Error::Unauthorized("agent token missing project_id".to_string())
            })?;
            return Ok(Principal::Agent {
                agent_id: agent_id.clone(),
                tenant_id: claims.tenant_id.clone(),
                project_id,
            });
        }
        if let Some(user_id) = &claims.user_id {
            return Ok(Principal::User {
                user_id: user_id.clone(),
                tenant_id: claims.tenant_id.clone(),
            });
        }
        Err(Error::Unauthorized(
            "token carries neither agent_id nor user_id".to_string(),
        ))
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            Principal::Agent { tenant_id, .. } | Principal::User { tenant_id, .. } => tenant_id,
        }
    }

    /// (actor_type, actor_id) pair for the audit log.
    pub fn actor(&self) -> (&str, &str) {
        match self {
            Principal::Agent { agent_id, .. } => ("agent", agent_id),
            Principal::User { user_id, .. } => ("user", user_id),
        }
    }
}

/// HS256 validator/minter over a shared secret. Issuance normally lives
/// outside the control plane; minting is kept for tooling and tests.
pub struct TokenValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenValidator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::default();
        validation.set_required_spec_claims(&["exp"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims> {
        let token = token.trim().trim_start_matches("Bearer ").trim();
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| Error::Unauthorized(format!("invalid token: {err}")))
    }

    pub fn mint(&self, claims: &Claims) -> Result<String> {
        encode(&Header::default(), claims, &self.encoding)
            .map_err(|err| Error::Internal(format!("failed to sign token: {err}")))
    }
}

//! Caller identity and the upload API key gate
//!
//! Identity is resolved upstream; the gateway forwards it as `X-User-Id` and
//! `X-User-Role`, which are trusted as-is here.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::error::{AppError, Result};
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const API_KEY_HEADER: &str = "x-api-key";

const ADMIN_ROLE: &str = "admin";

/// Whoever is making the request, possibly nobody
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<String>,
    pub role: Option<String>,
}

impl Caller {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            role: None,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            role: Some(ADMIN_ROLE.to_string()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            user_id: read(USER_ID_HEADER),
            role: read(USER_ROLE_HEADER),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role
            .as_deref()
            .map(|r| r.eq_ignore_ascii_case(ADMIN_ROLE))
            .unwrap_or(false)
    }

    /// Owner id recorded for things this caller creates
    pub fn owner_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or("")
    }

    /// Admins see everything; everyone else only what they own
    pub fn can_access(&self, owner_id: &str) -> bool {
        self.is_admin() || self.owner_id().eq_ignore_ascii_case(owner_id)
    }

    pub fn require_user(&self) -> Result<&str> {
        self.user_id
            .as_deref()
            .ok_or_else(|| AppError::Unauthorized("User ID is required".to_string()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(Caller::from_headers(&parts.headers))
    }
}

/// Reject upload requests without the configured `X-Api-Key`
///
/// No key configured means the gate is open.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response> {
    if let Some(expected) = state.config().upload.api_key.as_deref() {
        let provided = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());

        if provided != Some(expected) {
            tracing::warn!(path = %req.uri().path(), "Rejected upload request with bad API key");
            return Err(AppError::Unauthorized("Invalid API key".to_string()));
        }
    }

    Ok(next.run(req).await)
}

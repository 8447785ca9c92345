use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::CredentialService;
use crate::database::{DatabaseError, Document};
use crate::error::{ApiError, NO_PERMISSION};
use crate::schemas::parse_timestamp;

pub const TOKEN_COOKIE: &str = "jwt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Guide,
    LeadGuide,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "guide" => Some(Role::Guide),
            "lead-guide" => Some(Role::LeadGuide),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Guide => "guide",
            Role::LeadGuide => "lead-guide",
            Role::Admin => "admin",
        }
    }
}

/// The authenticated caller. Built once per request and read-only after.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Principal {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub photo: Option<String>,
    #[serde(skip)]
    pub password_changed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub active: bool,
}

impl Principal {
    /// `None` when the stored user lacks an identity field or has an unknown
    /// role.
    pub fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            id: doc.id,
            name: doc.get_str("name")?.to_string(),
            email: doc.get_str("email")?.to_string(),
            role: Role::parse(doc.get_str("role").unwrap_or("user"))?,
            photo: doc.get_str("photo").map(str::to_string),
            password_changed_at: doc.get_str("passwordChangedAt").and_then(parse_timestamp),
            active: doc.data.get("active").and_then(Value::as_bool).unwrap_or(true),
        })
    }

    pub fn has_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }
}

/// Resolves a token subject to the current state of that principal.
#[async_trait]
pub trait PrincipalLookup: Send + Sync {
    async fn find_principal(&self, id: Uuid) -> Result<Option<Principal>, DatabaseError>;
}

#[derive(Clone)]
pub struct AuthState {
    pub credentials: Arc<CredentialService>,
    pub principals: Arc<dyn PrincipalLookup>,
}

/// Bearer header first, then the session cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    from_header.or_else(|| parse_cookie(headers, TOKEN_COOKIE))
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all("cookie") {
        let Ok(s) = header.to_str() else { continue };
        for part in s.split(';') {
            if let Some((k, v)) = part.trim().split_once('=') {
                if k == name && !v.is_empty() {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

/// Extract → verify → resolve → staleness. Every failure is the same 401.
pub async fn authenticate(state: &AuthState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let token = extract_token(headers).ok_or_else(ApiError::not_logged_in)?;

    let verified = state.credentials.verify_token(&token).map_err(|e| {
        tracing::warn!("Rejected session token: {}", e);
        ApiError::not_logged_in()
    })?;

    let principal = state
        .principals
        .find_principal(verified.principal_id)
        .await?
        .filter(|p| p.active)
        .ok_or_else(|| {
            tracing::warn!("Token subject {} no longer exists", verified.principal_id);
            ApiError::not_logged_in()
        })?;

    if CredentialService::is_token_stale_after_password_change(verified.issued_at, principal.password_changed_at) {
        tracing::warn!("Token for {} predates its last password change", principal.id);
        return Err(ApiError::not_logged_in());
    }

    tracing::debug!("Authenticated {} as {}", principal.id, principal.role.as_str());
    Ok(principal)
}

pub async fn require_auth(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = authenticate(&state, request.headers()).await?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Attaches a principal when the request carries a valid session and
/// proceeds anonymously otherwise.
pub async fn optional_auth(State(state): State<AuthState>, mut request: Request, next: Next) -> Response {
    match authenticate(&state, request.headers()).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
        }
        Err(e) => tracing::debug!("Continuing anonymously: {}", e),
    }
    next.run(request).await
}

/// Role gate; runs after [`require_auth`].
pub async fn restrict_to(
    State(roles): State<&'static [Role]>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = request
        .extensions()
        .get::<Principal>()
        .ok_or_else(ApiError::not_logged_in)?;

    if !principal.has_role(roles) {
        tracing::warn!("{} ({}) denied", principal.id, principal.role.as_str());
        return Err(ApiError::forbidden(NO_PERMISSION));
    }
    Ok(next.run(request).await)
}

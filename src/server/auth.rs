//! Bearer token authentication
//!
//! Tokens come from configuration. The admin token opens every endpoint;
//! user tokens open the allocation endpoint only. Requesters are recorded
//! by a token fingerprint, never by the raw token.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use super::api::ErrorResponse;
use super::server::AppState;
use crate::config::ServerConfig;
use crate::models::Requester;

/// Hex characters of the SHA-256 digest kept in a user fingerprint
const FINGERPRINT_LEN: usize = 16;

/// Requester id recorded for the admin token
pub const ADMIN_REQUESTER: &str = "admin";

/// Role a token grants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

/// Authentication failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("malformed Authorization header, expected `Bearer <token>`")]
    MalformedHeader,

    #[error("invalid token")]
    InvalidToken,

    #[error("admin token required")]
    AdminRequired,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingHeader | Self::MalformedHeader => StatusCode::UNAUTHORIZED,
            Self::InvalidToken | Self::AdminRequired => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

/// Known tokens and their roles
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    admin: Option<String>,
    users: HashSet<String>,
}

impl TokenRegistry {
    pub fn new(admin: Option<String>, users: impl IntoIterator<Item = String>) -> Self {
        Self {
            admin: admin.filter(|t| !t.is_empty()),
            users: users.into_iter().filter(|t| !t.is_empty()).collect(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.admin_token.clone(), config.user_tokens.iter().cloned())
    }

    /// Role granted by `token`, if any
    pub fn role(&self, token: &str) -> Option<Role> {
        if self.admin.as_deref() == Some(token) {
            Some(Role::Admin)
        } else if self.users.contains(token) {
            Some(Role::User)
        } else {
            None
        }
    }

    pub fn has_admin(&self) -> bool {
        self.admin.is_some()
    }
}

/// Short, stable identifier for a token
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..FINGERPRINT_LEN].to_string()
}

/// Requester id for an authenticated token
pub fn requester_for(role: Role, token: &str) -> Requester {
    match role {
        Role::Admin => Requester::new(ADMIN_REQUESTER),
        Role::User => Requester::new(format!("user:{}", fingerprint(token))),
    }
}

/// Extract the token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or(AuthError::MalformedHeader)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token)
}

/// Caller holding the admin token
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        match state.tokens.role(token) {
            Some(Role::Admin) => Ok(AdminAuth),
            Some(Role::User) => Err(AuthError::AdminRequired),
            None => Err(AuthError::InvalidToken),
        }
    }
}

/// Caller holding a user or admin token
#[derive(Debug, Clone)]
pub struct UserIdentity(pub Requester);

impl FromRequestParts<AppState> for UserIdentity {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let role = state.tokens.role(token).ok_or(AuthError::InvalidToken)?;
        Ok(UserIdentity(requester_for(role, token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Ok("abc"));
        assert_eq!(bearer_token(&headers("bearer  abc ")), Ok("abc"));
        assert_eq!(bearer_token(&HeaderMap::new()), Err(AuthError::MissingHeader));
        assert_eq!(bearer_token(&headers("Basic abc")), Err(AuthError::MalformedHeader));
        assert_eq!(bearer_token(&headers("Bearer")), Err(AuthError::MalformedHeader));
    }

    #[test]
    fn test_registry_roles() {
        let registry = TokenRegistry::new(Some("root".into()), vec!["u1".into(), String::new()]);
        assert_eq!(registry.role("root"), Some(Role::Admin));
        assert_eq!(registry.role("u1"), Some(Role::User));
        assert_eq!(registry.role(""), None);
        assert_eq!(registry.role("nope"), None);
    }

    #[test]
    fn test_requester_never_contains_token() {
        let requester = requester_for(Role::User, "secret-token");
        assert!(requester.as_str().starts_with("user:"));
        assert!(!requester.as_str().contains("secret-token"));
        assert_eq!(requester, requester_for(Role::User, "secret-token"));
        assert_eq!(requester_for(Role::Admin, "root").as_str(), ADMIN_REQUESTER);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::MissingHeader.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidToken.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::AdminRequired.status(), StatusCode::FORBIDDEN);
    }
}

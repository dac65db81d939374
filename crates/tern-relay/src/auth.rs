//! Bearer token authentication
//!
//! Every API route except `/health` requires a bearer token carrying the
//! configured scope. Tokens are HS256 JWTs; a dev mode accepts any token
//! for local testing, reading `dev:<user>` tokens as that user.

use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tern_ai::ErrorResponse;
use thiserror::Error;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingAuthHeader,

    #[error("invalid authorization header format")]
    InvalidAuthHeader,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    TokenExpired,

    /// Token is valid but lacks the required scope
    #[error("missing required scope '{0}'")]
    InsufficientScope(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InsufficientScope(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::InsufficientScope(_) => "FORBIDDEN",
            _ => "UNAUTHORIZED",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
            details: Vec::new(),
        });
        (self.status(), body).into_response()
    }
}

/// JWT claims the relay looks at
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Space separated delegated scopes (Entra style)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scp: Option<String>,

    /// Space separated scopes (OAuth style)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Claims {
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scp
            .iter()
            .chain(self.scope.iter())
            .flat_map(|s| s.split_whitespace())
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().any(|s| s == scope)
    }
}

/// Turns a bearer token into claims
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<Claims, AuthError>;
}

/// HS256 JWT validation
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str, audience: Option<&str>, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
        }

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::warn!("JWT validation failed: {:?}", e);
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::InvalidToken(e.to_string()),
                }
            })
    }
}

/// Accepts any non-empty token and grants it the given scope
pub struct DevValidator {
    scope: String,
}

impl DevValidator {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }
}

impl TokenValidator for DevValidator {
    fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::InvalidToken("empty token".to_string()));
        }
        let user = token.strip_prefix("dev:").filter(|u| !u.is_empty()).unwrap_or("dev");
        Ok(Claims {
            sub: user.to_string(),
            exp: i64::MAX,
            scp: Some(self.scope.clone()),
            scope: None,
            name: Some(user.to_string()),
        })
    }
}

/// Authentication state shared across handlers
#[derive(Clone)]
pub struct AuthState {
    validator: Arc<dyn TokenValidator>,
    required_scope: String,
}

impl AuthState {
    pub fn new(validator: Arc<dyn TokenValidator>, required_scope: impl Into<String>) -> Self {
        Self {
            validator,
            required_scope: required_scope.into(),
        }
    }

    pub fn required_scope(&self) -> &str {
        &self.required_scope
    }

    /// Validate a token and check the required scope
    pub fn authorize(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.validator.validate(token)?;
        if !claims.has_scope(&self.required_scope) {
            tracing::debug!(sub = %claims.sub, "token lacks required scope");
            return Err(AuthError::InsufficientScope(self.required_scope.clone()));
        }
        Ok(claims)
    }
}

/// Extract a bearer token from an Authorization header value
fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }
    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }
    Ok(token)
}

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub claims: Claims,
}

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.claims.sub
    }

    pub fn display_name(&self) -> &str {
        self.claims.name.as_deref().unwrap_or(&self.claims.sub)
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    AuthState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthState::from_ref(state);
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuthHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;
        let token = bearer_token_from_header(header)?;
        let claims = auth.authorize(token)?;
        Ok(CurrentUser { claims })
    }
}

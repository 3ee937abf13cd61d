//! Authentication Middleware
//!
//! Resolves the caller's identity before the chat upgrade. The token may come
//! from the `Authorization` header or, because browsers cannot set headers on
//! a WebSocket handshake, from the `access_token` query parameter.

use axum::{
    extract::{Query, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, Uri},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;
use crate::startup::AppState;

/// Header carrying the identity when authentication is disabled
pub const TEST_USER_HEADER: &str = "x-test-user-id";

/// Identity used when authentication is disabled and no header is given
pub const DEFAULT_TEST_USER: &str = "test-user";

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Authenticated user extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

/// Authentication middleware that validates JWT tokens
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = if state.settings.auth.disabled {
        let user = dev_user(request.headers());
        tracing::warn!(user_id = %user.user_id, "Authentication is disabled, trusting test identity");
        user
    } else {
        let token = extract_token(request.headers(), request.uri())?;
        authenticate(&token, &state.settings.auth.jwt_secret)?
    };

    // Insert authenticated user into request extensions
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Find a bearer token in the header, falling back to the query string.
fn extract_token(headers: &HeaderMap, uri: &Uri) -> Result<String, AppError> {
    if let Some(auth_header) = headers.get(AUTHORIZATION) {
        let value = auth_header
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid authorization header".into()))?;
        return value
            .strip_prefix("Bearer ")
            .map(str::to_string)
            .ok_or_else(|| AppError::Unauthorized("Invalid authorization header format".into()));
    }

    Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(q)| q.access_token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing access token".into()))
}

/// Validate an HS256 token and turn its subject into an identity.
pub fn authenticate(token: &str, secret: &str) -> Result<AuthUser, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::Unauthorized("Token expired".into())
        }
        _ => AppError::Unauthorized("Invalid token".into()),
    })?;

    if token_data.claims.sub.is_empty() {
        return Err(AppError::Unauthorized("Invalid token claims".into()));
    }

    Ok(AuthUser {
        user_id: token_data.claims.sub,
    })
}

fn dev_user(headers: &HeaderMap) -> AuthUser {
    let user_id = headers
        .get(TEST_USER_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_TEST_USER);

    AuthUser {
        user_id: user_id.to_string(),
    }
}

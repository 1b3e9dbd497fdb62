//! Bearer token authentication middleware for Axum
//!
//! Tokens are issued elsewhere; the gateway only verifies them.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::infrastructure::crypto::jwt::{verify_token, TokenClaims};
use crate::interfaces::http::common::ApiError;
use crate::interfaces::http::router::ApiState;

/// Caller identity placed in request extensions by [`auth_middleware`].
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub subject: String,
    /// Numeric account id, when the subject is one
    pub user_id: Option<i32>,
    pub is_admin: bool,
}

impl AuthenticatedUser {
    pub fn from_claims(claims: TokenClaims) -> Self {
        Self {
            user_id: claims.user_id(),
            is_admin: claims.is_admin(),
            subject: claims.sub,
        }
    }

    /// Account a command is billed to: the caller's own unless an admin
    /// names another.
    pub fn billable_account(&self, requested: Option<i32>) -> Result<i32, ApiError> {
        match (requested, self.user_id) {
            (Some(id), Some(own)) if id == own => Ok(id),
            (Some(id), _) if self.is_admin => Ok(id),
            (Some(_), _) => Err(ApiError::forbidden(
                "user_id may only name another account with an admin token",
            )),
            (None, Some(own)) => Ok(own),
            (None, None) => Err(ApiError::bad_request(format!(
                "user_id is required when the token subject '{}' is not an account id",
                self.subject
            ))),
        }
    }
}

fn extract_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn auth_middleware(
    State(state): State<ApiState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(auth_header) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    else {
        return ApiError::unauthorized("Missing authentication token").into_response();
    };

    let Some(token) = extract_token(auth_header) else {
        return ApiError::unauthorized("Expected a Bearer token").into_response();
    };

    match verify_token(token, &state.jwt) {
        Ok(claims) => {
            request
                .extensions_mut()
                .insert(AuthenticatedUser::from_claims(claims));
            next.run(request).await
        }
        Err(e) => {
            debug!(error = %e, "Token rejected");
            let message = match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => "Token has expired",
                _ => "Invalid authentication token",
            };
            ApiError::unauthorized(message).into_response()
        }
    }
}

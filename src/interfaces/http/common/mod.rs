//! Error body and extractors shared by every handler

pub mod validated_json;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::application::charging::commands::DispatchError;
use crate::domain::DomainError;

pub use validated_json::ValidatedJson;

/// `{"error": <kind>, "message": <text>}` with a matching status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        let message = e.to_string();
        match e {
            DispatchError::NotConnected(_) => {
                Self::new(StatusCode::NOT_FOUND, "not_connected", message)
            }
            DispatchError::Undeliverable(_) | DispatchError::Relay(_) => {
                Self::new(StatusCode::BAD_GATEWAY, "undeliverable", message)
            }
            DispatchError::Timeout(_) => Self::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message),
            DispatchError::Validation(_) => Self::bad_request(message),
            DispatchError::Domain(domain) => domain.into(),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        let message = e.to_string();
        match e {
            DomainError::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, "not_found", message),
            DomainError::Validation(_) => Self::bad_request(message),
            DomainError::Conflict(_) | DomainError::InvalidTransition { .. } => {
                Self::new(StatusCode::CONFLICT, "conflict", message)
            }
            DomainError::Storage(_) => {
                error!(error = message.as_str(), "Storage failure behind API call");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "storage failure")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.kind,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

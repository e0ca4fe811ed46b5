use std::collections::HashMap;

use axum::{
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Outcome of a backing-store call, classified before it reaches a handler.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("edit conflict")]
    EditConflict,
    #[error("duplicate email")]
    DuplicateEmail,
    #[error("query timed out")]
    Timeout,
    #[error("unsafe sort parameter: {0}")]
    UnsafeSort(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl From<tokio::time::error::Elapsed> for StoreError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        StoreError::Timeout
    }
}

/// Everything a handler can answer with. Each variant maps to one HTTP status
/// and one JSON error body shape.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(HashMap<String, String>),
    #[error("the requested resource could not be found")]
    NotFound,
    #[error("the {0} method is not supported for this resource")]
    MethodNotAllowed(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,
    #[error("invalid authentication credentials")]
    InvalidCredentials,
    #[error("invalid or missing authentication token")]
    InvalidAuthenticationToken,
    #[error("you must be authenticated to access this resource")]
    AuthenticationRequired,
    #[error("your user account must be activated to access this resource")]
    InactiveAccount,
    #[error("your user account doesn't have the necessary permissions to access this resource")]
    NotPermitted,
    #[error("rate limit exceeded")]
    RateLimitExceeded,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Fires when a state that validation should have made unreachable is
    /// observed anyway. Logged loudly, reported to the client as a plain 500.
    pub fn invariant(message: &str) -> Self {
        ApiError::Internal(anyhow::anyhow!("invariant violated: {message}"))
    }
}

/// `MethodRouter` fallback: the path matched but no handler takes this method.
/// Keeps 405s in the same JSON envelope as every other error.
pub async fn method_not_allowed(method: Method) -> ApiError {
    ApiError::MethodNotAllowed(method.to_string())
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::EditConflict => ApiError::EditConflict,
            other => ApiError::Internal(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::EditConflict => StatusCode::CONFLICT,
            ApiError::InvalidCredentials | ApiError::AuthenticationRequired => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::InvalidAuthenticationToken => StatusCode::UNAUTHORIZED,
            ApiError::InactiveAccount | ApiError::NotPermitted => StatusCode::FORBIDDEN,
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            ApiError::Validation(errors) => json!({ "error": errors }),
            ApiError::Internal(err) => {
                // Full detail stays server-side.
                error!(error = %err, "internal server error");
                json!({
                    "error": "the server encountered a problem and could not process your request"
                })
            }
            other => json!({ "error": other.to_string() }),
        };

        let mut response = (status, Json(body)).into_response();
        if matches!(self, ApiError::InvalidAuthenticationToken) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, "Bearer".parse().expect("static header"));
        }
        response
    }
}

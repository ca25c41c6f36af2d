use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Errors raised by the profiling core
#[derive(Debug, thiserror::Error)]
pub enum ProfilerError {
    /// Tracer attached twice without detaching
    #[error("statement tracer for {0} is already attached")]
    AlreadyAttached(String),
    /// Tracer detached while not attached
    #[error("statement tracer for {0} is not attached")]
    NotAttached(String),
    /// Request record missing at finalize time
    #[error("request record {0} not found")]
    RecordNotFound(i64),
    /// Second finalization of a request record
    #[error("request record {0} is already finalized")]
    AlreadyFinalized(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Background bookkeeping task went away
    #[error("profiling task failed: {0}")]
    Task(String),
}

impl ProfilerError {
    /// True for programming errors in the attach/finalize lifecycle
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::AlreadyAttached(_) | Self::NotAttached(_) | Self::AlreadyFinalized(_)
        )
    }
}

/// HTTP error types for the viewer API and demo application
#[derive(Debug)]
pub enum AppError {
    /// Requested record does not exist
    NotFound(String),
    /// Malformed client input
    BadRequest(String),
    /// Storage failure
    DatabaseError(String),
    /// Internal server error
    InternalError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            Self::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            Self::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::DatabaseError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Self::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::NotFound(_) => "not_found",
        AppError::BadRequest(_) => "bad_request",
        AppError::DatabaseError(_) => "database_error",
        AppError::InternalError(_) => "internal_error",
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(err.to_string())
    }
}

impl From<crate::engine::EngineError> for AppError {
    fn from(err: crate::engine::EngineError) -> Self {
        match err {
            crate::engine::EngineError::Compile(e) => Self::BadRequest(e.to_string()),
            crate::engine::EngineError::Database(e) => Self::DatabaseError(e.to_string()),
        }
    }
}

impl From<ProfilerError> for AppError {
    fn from(err: ProfilerError) -> Self {
        match err {
            ProfilerError::RecordNotFound(id) => Self::NotFound(format!("request {}", id)),
            ProfilerError::Database(e) => Self::DatabaseError(e.to_string()),
            other => Self::InternalError(other.to_string()),
        }
    }
}

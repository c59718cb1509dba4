use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use orthoflow_core::error::CoreError;
use orthoflow_pipeline::{StoreError, SupervisorError};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and the pipeline's store and
/// supervisor errors, and adds HTTP-specific variants. Implements
/// [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `orthoflow_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A project store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A start/resume rejection from the orchestrator supervisor.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The upload exceeded the configured size limit.
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => classify_core_error(core),

            // --- Store errors ---
            AppError::Store(StoreError::Conflict(task_id)) => (
                StatusCode::CONFLICT,
                "CONFLICT",
                format!("Project {task_id} already exists"),
            ),
            AppError::Store(StoreError::Database(err)) => classify_sqlx_error(err),

            // --- Supervisor errors ---
            AppError::Supervisor(err) => match err {
                SupervisorError::Conflict(_) => {
                    (StatusCode::CONFLICT, "CONFLICT", err.to_string())
                }
                SupervisorError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", "Project not found".to_string())
                }
                SupervisorError::InvalidState { status, .. } => (
                    StatusCode::BAD_REQUEST,
                    "INVALID_STATE",
                    format!("Cannot start processing. Current status: {status}"),
                ),
                SupervisorError::ShuttingDown => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SHUTTING_DOWN",
                    err.to_string(),
                ),
                SupervisorError::Store(StoreError::Database(db)) => classify_sqlx_error(db),
                SupervisorError::Store(StoreError::Conflict(_)) => {
                    (StatusCode::CONFLICT, "CONFLICT", err.to_string())
                }
            },

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg.clone())
            }
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_core_error(core: &CoreError) -> (StatusCode, &'static str, String) {
    match core {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Unique constraint violations (constraint name starting with `uq_`) map to 409.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) => {
            // PostgreSQL unique constraint violation: error code 23505
            if db_err.code().as_deref() == Some("23505") {
                let constraint = db_err.constraint().unwrap_or("unknown");
                if constraint.starts_with("uq_") {
                    return (
                        StatusCode::CONFLICT,
                        "CONFLICT",
                        format!("Duplicate value violates unique constraint: {constraint}"),
                    );
                }
            }
            tracing::error!(error = %db_err, "Database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
        other => {
            tracing::error!(error = %other, "Database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}


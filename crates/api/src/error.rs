use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use meshgate_core::error::CoreError;
use meshgate_core::intake::IntakeError;
use meshgate_csm::api::CsmApiError;
use meshgate_pipeline::error::{DispatchError, DispatchFailure};
use serde_json::json;

/// Message returned for every dispatch failure that is not a queue or
/// configuration problem. Details go to the log only.
const DISPATCH_FAILED_MESSAGE: &str = "Failed to process images with Meshroom";

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain errors of each crate and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `meshgate_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An upload batch broke an intake rule.
    #[error(transparent)]
    Intake(#[from] IntakeError),

    /// Preparing or queueing a reconstruction failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The remote render service rejected a request or could not be reached.
    /// The message is shown to the client.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// A required setting is missing. The message is shown to the client.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A webhook body could not be processed.
    #[error("Webhook error: {0}")]
    Webhook(String),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Turn a remote API failure into a client-visible message.
    ///
    /// Uses the upstream `message` when the service sent one, `fallback`
    /// otherwise, and appends the upstream status when known.
    pub fn upstream(err: CsmApiError, fallback: &str) -> Self {
        tracing::error!(error = %err, "CSM API request failed");

        let message = err.upstream_message().unwrap_or_else(|| fallback.to_string());
        match err.status() {
            Some(status) => Self::Upstream(format!("{message} (Status: {status})")),
            None => Self::Upstream(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => {
                    tracing::debug!(entity, id = %id, "Lookup missed");
                    (
                        StatusCode::NOT_FOUND,
                        "NOT_FOUND",
                        format!("{entity} not found"),
                    )
                }
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            AppError::Intake(err) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string()),

            AppError::Dispatch(err) => classify_dispatch_error(err),

            AppError::Upstream(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "UPSTREAM_ERROR", msg.clone())
            }
            AppError::Configuration(msg) => {
                tracing::error!(error = %msg, "Configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIGURATION_ERROR",
                    msg.clone(),
                )
            }
            AppError::Webhook(msg) => {
                tracing::error!(error = %msg, "Webhook error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "WEBHOOK_ERROR",
                    "Webhook processing failed".to_string(),
                )
            }

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
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

/// Classify a dispatch error into an HTTP status, error code, and message.
///
/// - A full or closed queue maps to 503.
/// - A missing or non-executable tool maps to 500 with a configuration message.
/// - Everything else maps to 500 with a sanitized message.
fn classify_dispatch_error(err: &DispatchError) -> (StatusCode, &'static str, String) {
    match &err.source {
        DispatchFailure::QueueFull => (
            StatusCode::SERVICE_UNAVAILABLE,
            "QUEUE_FULL",
            "Render queue is full, try again later".to_string(),
        ),
        DispatchFailure::QueueClosed => (
            StatusCode::SERVICE_UNAVAILABLE,
            "SHUTTING_DOWN",
            "Server is shutting down".to_string(),
        ),
        failure if failure.is_configuration() => {
            tracing::error!(job_id = %err.job_id, error = %failure, "Reconstruction tool misconfigured");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIGURATION_ERROR",
                "Reconstruction tool is not installed or not executable".to_string(),
            )
        }
        failure => {
            tracing::error!(job_id = %err.job_id, error = %failure, "Dispatch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DISPATCH_ERROR",
                DISPATCH_FAILED_MESSAGE.to_string(),
            )
        }
    }
}

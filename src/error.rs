//! Crate-wide error taxonomy and its mapping onto HTTP responses.
//!
//! The pipeline components (`Guard`, `Planner`, `Executor`, `Coordinator`)
//! return their own narrow error types; the `/query` handler folds all of
//! them into `ServiceError`, which is the only error type that knows how to
//! become an HTTP response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::guard::GuardError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("request body was not valid JSON")]
    BadJson,

    #[error("question is required and must be non-empty")]
    MissingQuestion,

    #[error("candidate SQL failed the guard: {0}")]
    GuardRejection(#[from] GuardError),

    #[error("missing or mismatched service key")]
    Unauthorized,

    #[error("database is unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("LLM call failed at stage '{stage}': {source}")]
    LlmFailure {
        stage: &'static str,
        source: anyhow::Error,
    },

    #[error("could not parse planner reply as JSON")]
    PlannerParseError { raw: String },

    #[error("execution failed: {message}")]
    ExecutionError { message: String, sql: String },

    #[error("retry exhausted: {message}")]
    RetryExhausted { message: String, sql: String },

    #[error("request deadline exceeded")]
    RequestDeadlineExceeded,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    fn status(&self) -> StatusCode {
        match self {
            ServiceError::BadJson
            | ServiceError::MissingQuestion
            | ServiceError::GuardRejection(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServiceError::RequestDeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::DatabaseUnavailable(_)
            | ServiceError::LlmFailure { .. }
            | ServiceError::PlannerParseError { .. }
            | ServiceError::ExecutionError { .. }
            | ServiceError::RetryExhausted { .. }
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The stable `error` discriminant returned to clients; never leaks
    /// connection strings, env vars, or stack frames.
    fn body(&self) -> serde_json::Value {
        match self {
            ServiceError::BadJson => json!({"ok": false, "error": "bad_json"}),
            ServiceError::MissingQuestion => json!({"ok": false, "error": "missing_question"}),
            ServiceError::GuardRejection(e) => json!({
                "ok": false,
                "error": "guard_rejection",
                "kind": e.kind(),
                "detail": e.to_string(),
                "sql": e.sql(),
            }),
            ServiceError::Unauthorized => json!({"ok": false, "error": "unauthorized"}),
            ServiceError::DatabaseUnavailable(_) => {
                json!({"ok": false, "error": "database_unavailable"})
            }
            ServiceError::LlmFailure { stage, .. } => {
                json!({"ok": false, "error": "llm_failure", "stage": stage})
            }
            ServiceError::PlannerParseError { raw } => json!({
                "ok": false,
                "error": "planner_parse_error",
                "raw": raw,
            }),
            ServiceError::ExecutionError { message, sql } => json!({
                "ok": false,
                "error": "execution_error",
                "message": message,
                "sql": sql,
            }),
            ServiceError::RetryExhausted { message, sql } => json!({
                "ok": false,
                "error": "retry_exhausted",
                "message": message,
                "sql": sql,
            }),
            ServiceError::RequestDeadlineExceeded => {
                json!({"ok": false, "error": "request_deadline_exceeded"})
            }
            ServiceError::Internal(_) => json!({"ok": false, "error": "internal"}),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ServiceError::DatabaseUnavailable(msg) => tracing::error!(error = %msg, "database unavailable"),
            ServiceError::LlmFailure { stage, source } => {
                tracing::error!(stage = %stage, error = %source, "llm call failed")
            }
            ServiceError::Internal(e) => tracing::error!(error = %e, "internal error"),
            _ => tracing::warn!(error = %self, "request rejected"),
        }
        (status, Json(self.body())).into_response()
    }
}

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use crate::config::state::AppState;
use crate::error::ServiceError;

const REQUEST_DEADLINE: Duration = Duration::from_secs(120);

#[derive(Debug, Default, Deserialize)]
struct QueryRequest {
    question: Option<String>,
    #[serde(default)]
    minimal: bool,
}

#[instrument(skip(state, headers, body))]
pub async fn query_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServiceError> {
    let request: QueryRequest = if body.is_empty() {
        QueryRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|_| ServiceError::BadJson)?
    };

    let question = request
        .question
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or(ServiceError::MissingQuestion)?;

    let minimal = request.minimal || header_flag(&headers, "x-minimal");

    let outcome = tokio::time::timeout(REQUEST_DEADLINE, state.coordinator.handle(question))
        .await
        .map_err(|_| ServiceError::RequestDeadlineExceeded)??;

    let body = if minimal {
        json!({"ok": true, "answer": outcome.answer})
    } else {
        json!({
            "ok": true,
            "answer": outcome.answer,
            "sql": outcome.sql,
            "rows": outcome.rows,
        })
    };

    Ok(Json(body))
}

fn header_flag(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "1")
        .unwrap_or(false)
}

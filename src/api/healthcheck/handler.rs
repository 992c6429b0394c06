// Liveness probe: no auth, no database or LLM work.

use axum::Json;
use serde_json::{json, Value};

pub async fn healthcheck_handler() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

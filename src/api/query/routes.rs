use axum::{routing::post, Router};

use crate::config::state::AppState;

use super::handler::query_handler;

pub fn query_routes() -> Router<AppState> {
    Router::new().route("/query", post(query_handler))
}

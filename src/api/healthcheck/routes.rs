use axum::{routing::get, Router};

use crate::config::state::AppState;

use super::handler::healthcheck_handler;

pub fn healthcheck_routes() -> Router<AppState> {
    Router::new().route("/healthcheck", get(healthcheck_handler))
}

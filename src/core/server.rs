// Application server configuration and setup

use std::time::Duration;

use anyhow::Result;
use axum::{
    error_handling::HandleErrorLayer, extract::DefaultBodyLimit, middleware::from_fn_with_state,
    response::IntoResponse, Router,
};
use listenfd::ListenFd;
use tokio::{net::TcpListener, signal};
use tower::{timeout::TimeoutLayer, BoxError, ServiceBuilder};
use tower_http::catch_panic::CatchPanicLayer;

use crate::api;
use crate::config::environment::EnvironmentVariables;
use crate::config::state::AppState;
use crate::error::ServiceError;
use crate::middleware::auth::require_service_key;

/// Creates and configures the application router with all middleware
/// layers. `/query` carries the service-key auth layer; `/healthcheck`
/// does not.
pub fn create_app(state: AppState) -> Router {
    let env = state.environment.clone();

    let query = api::query::routes::query_routes()
        .route_layer(from_fn_with_state(state.clone(), require_service_key));

    Router::new()
        .merge(api::healthcheck::routes::healthcheck_routes())
        .merge(query)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .layer(CatchPanicLayer::new())
                .layer(TimeoutLayer::new(Duration::from_secs(env.default_timeout_seconds)))
                .layer(DefaultBodyLimit::max(env.max_request_body_size)),
        )
        .with_state(state)
}

async fn handle_timeout_error(_err: BoxError) -> axum::response::Response {
    ServiceError::RequestDeadlineExceeded.into_response()
}

/// Sets up the TCP listener from environment or binds to a new address.
pub async fn setup_listener(env: &EnvironmentVariables) -> Result<TcpListener> {
    let mut listenfd = ListenFd::from_env();

    let listener = match listenfd.take_tcp_listener(0)? {
        Some(std_listener) => {
            std_listener.set_nonblocking(true)?;
            TcpListener::from_std(std_listener)?
        }
        None => {
            let addr = format!("{}:{}", env.host, env.port);
            TcpListener::bind(&addr).await?
        }
    };

    Ok(listener)
}

/// Handles graceful shutdown signals (Ctrl+C and TERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Terminate signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate: std::future::Pending<()> = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Shutting down via Ctrl+C"),
        _ = terminate => tracing::info!("Shutting down via TERM signal"),
    }
}

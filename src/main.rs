// Main application entry point

use axum::serve;

use sql_query_service::config::environment::EnvironmentVariables;
use sql_query_service::config::state::AppState;
use sql_query_service::core::{logging, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let environment = EnvironmentVariables::load()?;

    logging::init_tracing(environment.debug_sql);

    let state = AppState::build(environment).await?;

    let listener = server::setup_listener(&state.environment).await?;
    let app: axum::Router = server::create_app(state);

    tracing::info!(addr = %listener.local_addr()?, "server listening");

    serve(listener, app)
        .with_graceful_shutdown(server::shutdown_signal())
        .await?;

    Ok(())
}

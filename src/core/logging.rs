// Logging configuration for the application
//
// Environments:
//
// 1. ENVIRONMENT=development (default):
//    - Application logs: INFO
//    - Framework logs: WARN (keeps axum/tower quiet)
//    - SQLx: WARN unless DEBUG_SQL is set
//    - No span enter/exit events
//
// 2. ENVIRONMENT=production:
//    - Only errors and important information
//    - SQLx: ERROR unless DEBUG_SQL is set
//    - No span events
//
// 3. ENVIRONMENT=debug:
//    - Verbose, with CLOSE span events (shows duration)
//
// DEBUG_SQL additionally raises the guard/planner/executor modules to
// DEBUG regardless of environment, so a single flag surfaces the SQL a
// request produced without turning on framework noise.
//
// Override manually with RUST_LOG:
// RUST_LOG=sql_query_service=debug,sqlx=info cargo run

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the tracing subscriber with environment-aware configuration.
pub fn init_tracing(debug_sql: bool) {
    let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

    let (base, span_events) = match environment.as_str() {
        "production" => ("sql_query_service=info,sqlx=error,tower_http=error,axum=error", FmtSpan::NONE),
        "debug" => ("sql_query_service=debug,sqlx=info,tower_http=debug,axum=debug", FmtSpan::CLOSE),
        _ => ("sql_query_service=info,sqlx=warn,tower_http=warn,axum=warn", FmtSpan::NONE),
    };

    let directive = if debug_sql {
        format!(
            "{base},sql_query_service::guard=debug,sql_query_service::planner=debug,sql_query_service::executor=debug"
        )
    } else {
        base.to_string()
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| directive.parse().unwrap());

    fmt().with_env_filter(env_filter).with_span_events(span_events).init();
}

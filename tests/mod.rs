//! Shared test helper: spawn the app on an ephemeral port with a
//! `MockChatClient` standing in for the LLM.

use std::sync::Arc;
use std::time::Duration;

use axum::serve;
use sql_query_service::config::environment::EnvironmentVariables;
use sql_query_service::config::state::AppState;
use sql_query_service::coordinator::{Coordinator, CoordinatorConfig};
use sql_query_service::core::server::create_app;
use sql_query_service::executor::Executor;
use sql_query_service::guard::DEFAULT_MAX_LIMIT;
use sql_query_service::llm::mock::MockChatClient;
use sql_query_service::llm::ChatCompletion;
use sql_query_service::schema::SchemaRegistry;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

pub const SERVICE_KEY: &str = "test-service-key";

pub fn live_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

fn test_environment(database_url: &str) -> EnvironmentVariables {
    EnvironmentVariables {
        environment: "development".to_string().into(),
        host: "127.0.0.1".to_string().into(),
        port: 0,
        max_request_body_size: 1_048_576,
        default_timeout_seconds: 120,
        database_url: database_url.to_string().into(),
        db_max_connections: 1,
        db_idle_timeout_seconds: 10,
        openai_api_key: "unused".to_string().into(),
        llm_timeout_seconds: 60,
        service_api_key: SERVICE_KEY.to_string().into(),
        db_query_timeout_ms: 5_000,
        debug_sql: false,
        declared_schema_path: "config/schema.toml".to_string().into(),
    }
}

fn test_schema() -> SchemaRegistry {
    SchemaRegistry::from_specs_for_test(vec![(
        "public.market_data".to_string(),
        vec![
            "ts".to_string(),
            "protocol".to_string(),
            "symbol".to_string(),
            "utilization".to_string(),
            "supply_apy".to_string(),
            "borrow_apy".to_string(),
        ],
    )])
}

/// Spawns the app with the given canned LLM replies and returns its base
/// URL. Uses a lazily-connecting pool against either `DATABASE_URL` (if
/// set) or a placeholder address, since tests that never exercise the
/// Coordinator's database probe (auth and validation failures) don't
/// need a reachable database at all.
pub async fn spawn_app(replies: Vec<&str>) -> String {
    let database_url = live_database_url().unwrap_or_else(|| "postgres://localhost/unused".to_string());
    let environment = test_environment(&database_url);

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_lazy(&database_url)
        .expect("lazy pool construction never fails");

    let replies: Vec<String> = replies.into_iter().map(str::to_string).collect();
    let llm: Arc<dyn ChatCompletion> = Arc::new(MockChatClient::new(replies));
    let executor = Executor::new(pool);
    let config = CoordinatorConfig {
        statement_timeout_ms: environment.db_query_timeout_ms,
        max_limit: DEFAULT_MAX_LIMIT,
        ..CoordinatorConfig::default()
    };
    let coordinator = Coordinator::new(Arc::new(test_schema()), llm, executor, config);
    let state = AppState::from_parts(environment, coordinator);

    let app = create_app(state);

    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind random port");
    std_listener.set_nonblocking(true).unwrap();
    let listener = TcpListener::from_std(std_listener).expect("convert to tokio listener");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        serve(listener, app).await.expect("server failed");
    });

    // Give the spawned task a tick to start accepting connections.
    tokio::time::sleep(Duration::from_millis(10)).await;

    format!("http://{addr}")
}

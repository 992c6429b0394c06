// Application state: an explicit, injectable value rather than a global
// singleton, so tests can construct a fresh one per case.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::environment::EnvironmentVariables;
use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::database;
use crate::executor::Executor;
use crate::guard::DEFAULT_MAX_LIMIT;
use crate::llm::{ChatCompletion, OpenAiChatClient};
use crate::schema::{DeclaredSchema, SchemaRegistry};

#[derive(Clone)]
pub struct AppState {
    pub environment: Arc<EnvironmentVariables>,
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    /// Connects to the database, loads and reconciles the declared schema
    /// against it, and wires the LLM client and Coordinator. Must complete
    /// before the router starts serving `/query`.
    pub async fn build(environment: EnvironmentVariables) -> Result<Self> {
        let environment = Arc::new(environment);

        let pool = database::create_pool(&environment).await?;

        let declared = DeclaredSchema::load(environment.declared_schema_path.as_ref())?;
        let schema = Arc::new(SchemaRegistry::load(&declared, &pool).await?);

        let llm: Arc<dyn ChatCompletion> = Arc::new(
            OpenAiChatClient::new(
                environment.openai_api_key.to_string(),
                Duration::from_secs(environment.llm_timeout_seconds),
            )?,
        );

        let executor = Executor::new(pool);
        let config = CoordinatorConfig {
            statement_timeout_ms: environment.db_query_timeout_ms,
            max_limit: DEFAULT_MAX_LIMIT,
            ..CoordinatorConfig::default()
        };
        let coordinator = Arc::new(Coordinator::new(schema, llm, executor, config));

        Ok(Self {
            environment,
            coordinator,
        })
    }

    /// Builds state around an already-constructed Coordinator, bypassing
    /// the database connection and schema reconciliation. Used by tests
    /// that want a real router with a `MockChatClient` and no live Postgres.
    pub fn from_parts(environment: EnvironmentVariables, coordinator: Coordinator) -> Self {
        Self {
            environment: Arc::new(environment),
            coordinator: Arc::new(coordinator),
        }
    }
}

// Environment configuration with layered loading and validation

use std::borrow::Cow;
use std::collections::HashMap;

use anyhow::Result;
use tracing::{debug, warn};

/// Contains all environment variables used by the application
#[derive(Clone, Debug)]
pub struct EnvironmentVariables {
    pub environment: Cow<'static, str>,
    pub host: Cow<'static, str>,
    pub port: u16,
    pub max_request_body_size: usize,
    pub default_timeout_seconds: u64,

    pub database_url: Cow<'static, str>,
    pub db_max_connections: u32,
    pub db_idle_timeout_seconds: u64,

    pub openai_api_key: Cow<'static, str>,
    pub llm_timeout_seconds: u64,

    pub service_api_key: Cow<'static, str>,

    /// Per-statement timeout handed to `SET statement_timeout`.
    pub db_query_timeout_ms: u64,
    /// Raises the `guard`/`planner`/`executor` spans to `debug`.
    pub debug_sql: bool,

    pub declared_schema_path: Cow<'static, str>,
}

impl EnvironmentVariables {
    /// Loads environment variables with priority: .env < .env.local < .env.production
    /// Always loads .env as base configuration, then overrides with environment-specific files
    pub fn load() -> Result<Self> {
        if let Err(e) = dotenv::from_path(".env") {
            warn!("Could not load .env file: {}", e);
        }

        let environment: String =
            std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        match environment.as_str() {
            "production" => {
                if let Err(e) = dotenv::from_path(".env.production") {
                    warn!("Could not load .env.production file: {}", e);
                }
            }
            _ => {
                if let Err(e) = dotenv::from_path(".env.local") {
                    debug!("No .env.local file found: {}", e);
                }
            }
        }

        let vars: HashMap<String, String> = std::env::vars().collect();

        let mut missing_vars: Vec<String> = Vec::new();
        let mut parse_errors: Vec<String> = Vec::new();

        let check_var = |key: &str, missing_vars: &mut Vec<String>| -> Option<String> {
            match vars.get(key) {
                Some(value) => Some(value.clone()),
                None => {
                    missing_vars.push(key.to_string());
                    None
                }
            }
        };

        // Required
        let database_url = check_var("DATABASE_URL", &mut missing_vars);
        let openai_api_key = check_var("OPENAI_API_KEY", &mut missing_vars);
        let service_api_key = check_var("SERVICE_API_KEY", &mut missing_vars);

        // Optional, with defaults
        let host = vars.get("HOST").cloned().unwrap_or_else(|| "0.0.0.0".to_string());
        let port_str = vars.get("PORT").cloned().unwrap_or_else(|| "3000".to_string());
        let max_body_size_str = vars
            .get("MAX_REQUEST_BODY_SIZE")
            .cloned()
            .unwrap_or_else(|| "1048576".to_string());
        let timeout_str = vars
            .get("DEFAULT_TIMEOUT_SECONDS")
            .cloned()
            .unwrap_or_else(|| "120".to_string());
        let db_query_timeout_ms_str = vars
            .get("DB_QUERY_TIMEOUT_MS")
            .cloned()
            .unwrap_or_else(|| "60000".to_string());
        let llm_timeout_str = vars
            .get("LLM_TIMEOUT_SECONDS")
            .cloned()
            .unwrap_or_else(|| "60".to_string());
        let db_max_connections_str = vars
            .get("DB_MAX_CONNECTIONS")
            .cloned()
            .unwrap_or_else(|| "5".to_string());
        let db_idle_timeout_str = vars
            .get("DB_IDLE_TIMEOUT_SECONDS")
            .cloned()
            .unwrap_or_else(|| "10".to_string());
        let debug_sql = vars
            .get("DEBUG_SQL")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let declared_schema_path = vars
            .get("DECLARED_SCHEMA_PATH")
            .cloned()
            .unwrap_or_else(|| "config/schema.toml".to_string());

        macro_rules! parse_numeric {
            ($name:literal, $value:expr, $ty:ty) => {
                match $value.parse::<$ty>() {
                    Ok(n) => Some(n),
                    Err(_) => {
                        parse_errors.push(format!(
                            "{} (current: \"{}\", should be: a numeric value)",
                            $name, $value
                        ));
                        None
                    }
                }
            };
        }

        let port: Option<u16> = parse_numeric!("PORT", port_str, u16);
        let max_request_body_size: Option<usize> =
            parse_numeric!("MAX_REQUEST_BODY_SIZE", max_body_size_str, usize);
        let default_timeout_seconds: Option<u64> =
            parse_numeric!("DEFAULT_TIMEOUT_SECONDS", timeout_str, u64);
        let db_query_timeout_ms: Option<u64> =
            parse_numeric!("DB_QUERY_TIMEOUT_MS", db_query_timeout_ms_str, u64);
        let llm_timeout_seconds: Option<u64> =
            parse_numeric!("LLM_TIMEOUT_SECONDS", llm_timeout_str, u64);
        let db_max_connections: Option<u32> =
            parse_numeric!("DB_MAX_CONNECTIONS", db_max_connections_str, u32);
        let db_idle_timeout_seconds: Option<u64> =
            parse_numeric!("DB_IDLE_TIMEOUT_SECONDS", db_idle_timeout_str, u64);

        if !matches!(environment.as_str(), "development" | "staging" | "production") {
            parse_errors.push(format!(
                "ENVIRONMENT (current: \"{}\", should be: \"development\", \"staging\", or \"production\")",
                environment
            ));
        }

        if !missing_vars.is_empty() || !parse_errors.is_empty() {
            let mut error_msg = String::new();

            if !missing_vars.is_empty() {
                error_msg.push_str("\nMissing required environment variables:\n");
                for var in &missing_vars {
                    error_msg.push_str(&format!("  - {}\n", var));
                }
            }

            if !parse_errors.is_empty() {
                error_msg.push_str("Incorrect format environment variables:\n");
                for error in &parse_errors {
                    error_msg.push_str(&format!("  - {}\n", error));
                }
            }

            return Err(anyhow::anyhow!("{}", error_msg.trim_end()));
        }

        Ok(Self {
            environment: Cow::Owned(environment),
            host: Cow::Owned(host),
            port: port.unwrap(),
            max_request_body_size: max_request_body_size.unwrap(),
            default_timeout_seconds: default_timeout_seconds.unwrap(),
            database_url: Cow::Owned(database_url.unwrap()),
            db_max_connections: db_max_connections.unwrap(),
            db_idle_timeout_seconds: db_idle_timeout_seconds.unwrap(),
            openai_api_key: Cow::Owned(openai_api_key.unwrap()),
            llm_timeout_seconds: llm_timeout_seconds.unwrap(),
            service_api_key: Cow::Owned(service_api_key.unwrap()),
            db_query_timeout_ms: db_query_timeout_ms.unwrap(),
            debug_sql,
            declared_schema_path: Cow::Owned(declared_schema_path),
        })
    }
}

// End of file: /src/config/environment.rs

//! The Planner: turns a normalized question into a `Plan` via one LLM call,
//! and regenerates the `Plan` once on a recoverable execution failure.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::ServiceError;
use crate::llm::{ChatCompletion, ChatMessage, ChatRequest};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresentationStyle {
    Concise,
    Bulleted,
    Headline,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PresentationHints {
    #[serde(default)]
    pub style: Option<PresentationStyle>,
    #[serde(default)]
    pub include_fields: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// The Planner's structured reply. Every field but `sql` is optional; a
/// missing or empty `sql` is treated as a parse failure by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub sql: String,
    #[serde(default)]
    pub presentation: Option<PresentationHints>,
}

static RECOVERABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)syntax error|OVER is not supported for ordered-set aggregate|percentile_(cont|disc)[^;]*OVER")
        .expect("valid literal regex")
});

/// Whether a database error message belongs to the small recoverable class
/// that earns the Planner exactly one retry.
pub fn is_recoverable_error(message: &str) -> bool {
    RECOVERABLE_RE.is_match(message)
}

pub struct Planner {
    client: Arc<dyn ChatCompletion>,
}

impl Planner {
    pub fn new(client: Arc<dyn ChatCompletion>) -> Self {
        Self { client }
    }

    /// Drafts the first `Plan` for a normalized question.
    pub async fn plan(&self, question: &str, schema_doc: &str) -> Result<Plan, ServiceError> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(system_message(schema_doc)),
                ChatMessage::user(user_message(question)),
            ],
        };
        self.ask(request).await
    }

    /// Regenerates the `Plan` after a recoverable execution failure,
    /// handing the model the previous SQL and the verbatim database error.
    pub async fn retry(
        &self,
        question: &str,
        schema_doc: &str,
        previous_sql: &str,
        db_error: &str,
    ) -> Result<Plan, ServiceError> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(system_message(schema_doc)),
                ChatMessage::user(retry_user_message(question, previous_sql, db_error)),
            ],
        };
        self.ask(request).await
    }

    async fn ask(&self, request: ChatRequest) -> Result<Plan, ServiceError> {
        let reply = self
            .client
            .complete(request)
            .await
            .map_err(|source| ServiceError::LlmFailure {
                stage: "planner",
                source,
            })?;
        parse_reply(&reply.content)
    }
}

fn system_message(schema_doc: &str) -> String {
    format!(
        "You are a SQL planning assistant for a read-only analytics database.\n\n\
         Respond with a single JSON object and nothing else, in this shape:\n\
         {{\"domain\": string, \"reason\": string, \"sql\": string, \"presentation\": \
         {{\"style\": \"concise\"|\"bulleted\"|\"headline\", \"include_fields\": [string], \"notes\": string}}}}\n\
         Only \"sql\" is required; omit fields you have nothing to say about.\n\n\
         Constraints:\n\
         - Exactly one statement, starting with SELECT or WITH. CTEs are allowed.\n\
         - No comments, no trailing semicolon, no write/DDL/admin keywords.\n\
         - Reference only the tables and columns declared below.\n\
         - Portable Postgres only; do not use window syntax on ordered-set aggregates \
         like percentile_cont.\n\
         - Include a protocol filter when the table has a protocol column.\n\
         - Uppercase asset symbols (e.g. \"weth\" -> \"WETH\"); map ETH to WETH.\n\
         - Columns documented as a 0..1 fraction are already fractions; do not multiply by 100.\n\n\
         Declared schema:\n{schema_doc}"
    )
}

fn user_message(question: &str) -> String {
    format!("Question: {question}\nRespond with the JSON object only.")
}

fn retry_user_message(question: &str, previous_sql: &str, db_error: &str) -> String {
    format!(
        "Question: {question}\n\
         The previous candidate failed to execute.\n\
         Previous SQL:\n{previous_sql}\n\
         Database error:\n{db_error}\n\
         Produce a corrected query that avoids the failing construct. Respond with the JSON object only."
    )
}

/// Parses a Planner reply. If the raw text is not valid JSON on its own,
/// attempts one recovery by locating the first balanced `{...}` substring.
fn parse_reply(raw: &str) -> Result<Plan, ServiceError> {
    let plan = serde_json::from_str::<Plan>(raw)
        .ok()
        .or_else(|| extract_balanced_object(raw).and_then(|obj| serde_json::from_str(obj).ok()));

    match plan {
        Some(plan) if !plan.sql.trim().is_empty() => Ok(plan),
        _ => Err(ServiceError::PlannerParseError {
            raw: raw.to_string(),
        }),
    }
}

/// Finds the first `{`, then scans forward tracking brace depth (ignoring
/// braces inside JSON string values) until it closes, returning that slice.
fn extract_balanced_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in s.bytes().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockChatClient;

    #[test]
    fn parses_the_bare_sql_shape() {
        let plan = parse_reply(r#"{"sql": "SELECT 1"}"#).unwrap();
        assert_eq!(plan.sql, "SELECT 1");
        assert!(plan.domain.is_none());
    }

    #[test]
    fn parses_the_rich_shape() {
        let raw = r#"{"domain":"lending","reason":"latest utilization","sql":"SELECT 1","presentation":{"style":"concise","include_fields":["ts"]}}"#;
        let plan = parse_reply(raw).unwrap();
        assert_eq!(plan.domain.as_deref(), Some("lending"));
        let presentation = plan.presentation.unwrap();
        assert_eq!(presentation.style, Some(PresentationStyle::Concise));
        assert_eq!(presentation.include_fields, vec!["ts".to_string()]);
    }

    #[test]
    fn recovers_a_balanced_object_surrounded_by_prose() {
        let raw = "Sure, here is the query:\n{\"sql\": \"SELECT 1\"}\nLet me know if you need changes.";
        let plan = parse_reply(raw).unwrap();
        assert_eq!(plan.sql, "SELECT 1");
    }

    #[test]
    fn braces_inside_a_json_string_do_not_confuse_recovery() {
        let raw = r#"{"sql": "SELECT '{' AS opener"}"#;
        let plan = parse_reply(raw).unwrap();
        assert_eq!(plan.sql, "SELECT '{' AS opener");
    }

    #[test]
    fn rejects_empty_sql() {
        let err = parse_reply(r#"{"sql": ""}"#).unwrap_err();
        assert!(matches!(err, ServiceError::PlannerParseError { .. }));
    }

    #[test]
    fn rejects_unparseable_text() {
        let err = parse_reply("not json at all").unwrap_err();
        assert!(matches!(err, ServiceError::PlannerParseError { .. }));
    }

    #[test]
    fn recognizes_the_recoverable_error_classes() {
        assert!(is_recoverable_error("ERROR: syntax error at or near \"FORM\""));
        assert!(is_recoverable_error(
            "OVER is not supported for ordered-set aggregate percentile_cont"
        ));
        assert!(is_recoverable_error(
            "percentile_cont(0.5) WITHIN GROUP (...) OVER (...) is not allowed"
        ));
        assert!(!is_recoverable_error("relation \"public.secrets\" does not exist"));
    }

    #[tokio::test]
    async fn plan_asks_the_client_and_parses_the_reply() {
        let client = Arc::new(MockChatClient::single(r#"{"sql": "SELECT 1"}"#));
        let planner = Planner::new(client.clone());
        let plan = planner.plan("latest utilization", "public.market_data — ...\n").await.unwrap();
        assert_eq!(plan.sql, "SELECT 1");
        assert_eq!(client.call_count().await, 1);
    }

    #[tokio::test]
    async fn retry_includes_the_previous_sql_and_the_error_in_the_prompt() {
        let client = Arc::new(MockChatClient::single(r#"{"sql": "SELECT 2"}"#));
        let planner = Planner::new(client.clone());
        let plan = planner
            .retry("latest utilization", "schema doc", "SELECT 1", "syntax error near FORM")
            .await
            .unwrap();
        assert_eq!(plan.sql, "SELECT 2");
        let sent = client.last_request().await.unwrap();
        let user_message = &sent.messages[1].content;
        assert!(user_message.contains("SELECT 1"));
        assert!(user_message.contains("syntax error near FORM"));
    }
}

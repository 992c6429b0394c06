//! The Coordinator: orchestrates the end-to-end request lifecycle —
//! normalize the question, probe the database, try a fast path, otherwise
//! Plan → Rewrite → Guard → Execute with one retry and one empty-result
//! fallback, then summarize and hand back the result.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::error::ServiceError;
use crate::executor::{Executor, ResultRow};
use crate::guard::{guard, mask_string_literals, GuardedSql};
use crate::llm::{ChatCompletion, ChatMessage, ChatRequest};
use crate::planner::{is_recoverable_error, Planner};
use crate::rewriter::{HeuristicRewriter, RewriterConfig};
use crate::schema::SchemaRegistry;

/// Deployment-specific fast-path knobs; mirrors `RewriterConfig`'s
/// assumption that the minutely series lives in one declared table.
#[derive(Debug, Clone)]
pub struct FastPathConfig {
    pub table: String,
    pub metric_column: String,
    pub protocol: String,
}

impl Default for FastPathConfig {
    fn default() -> Self {
        Self {
            table: "public.market_data".to_string(),
            metric_column: "utilization".to_string(),
            protocol: "aave".to_string(),
        }
    }
}

pub struct CoordinatorConfig {
    pub statement_timeout_ms: u64,
    pub max_limit: i64,
    pub rewriter: RewriterConfig,
    pub fast_path: FastPathConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            statement_timeout_ms: 60_000,
            max_limit: 500,
            rewriter: RewriterConfig::default(),
            fast_path: FastPathConfig::default(),
        }
    }
}

/// What a completed request produced. The HTTP handler decides whether to
/// include `sql`/`rows` in the response body (minimal vs full mode).
pub struct QueryOutcome {
    pub answer: String,
    pub sql: String,
    pub rows: Vec<ResultRow>,
}

pub struct Coordinator {
    schema: Arc<SchemaRegistry>,
    planner: Planner,
    rewriter: HeuristicRewriter,
    executor: Executor,
    summarizer: Arc<dyn ChatCompletion>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        schema: Arc<SchemaRegistry>,
        llm: Arc<dyn ChatCompletion>,
        executor: Executor,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            schema,
            planner: Planner::new(llm.clone()),
            rewriter: HeuristicRewriter::new(config.rewriter.clone()),
            executor,
            summarizer: llm,
            config,
        }
    }

    #[instrument(skip(self))]
    pub async fn handle(&self, question: &str) -> Result<QueryOutcome, ServiceError> {
        let question = normalize_question(question);

        self.executor.probe(self.config.statement_timeout_ms).await?;

        let (sql, rows, answer_override) = if let Some(fast) =
            fast_path(&question, &self.config.fast_path)
        {
            let guarded = guard(&fast.sql, &self.schema, self.config.max_limit)?;
            let rows = self.executor.execute(&guarded, self.config.statement_timeout_ms).await?;
            let answer = fast_path_answer(&fast, &rows);
            (guarded.as_str().to_string(), rows, Some(answer))
        } else {
            let (guarded, rows) = self.plan_rewrite_guard_execute(&question).await?;
            (guarded, rows, None)
        };

        let answer = match answer_override {
            Some(answer) => answer,
            None => self.summarize(&question, &rows).await,
        };
        let answer = crate::formatter::AnswerFormatter::format(&question, &answer);

        Ok(QueryOutcome { answer, sql, rows })
    }

    async fn plan_rewrite_guard_execute(
        &self,
        question: &str,
    ) -> Result<(String, Vec<ResultRow>), ServiceError> {
        let doc = self.schema.doc().to_string();
        let plan = self.planner.plan(question, &doc).await?;
        let rewritten = self.rewriter.rewrite(question, &plan.sql);
        let guarded = guard(&rewritten, &self.schema, self.config.max_limit)?;

        match self.executor.execute(&guarded, self.config.statement_timeout_ms).await {
            Ok(rows) => self.apply_empty_fallback(question, guarded, rows).await,
            Err(ServiceError::ExecutionError { message, sql }) if is_recoverable_error(&message) => {
                info!(error = %message, "retrying planner after recoverable execution error");
                let retried = self.planner.retry(question, &doc, &sql, &message).await?;
                let rewritten = self.rewriter.rewrite(question, &retried.sql);
                let guarded = guard(&rewritten, &self.schema, self.config.max_limit)?;
                match self.executor.execute(&guarded, self.config.statement_timeout_ms).await {
                    Ok(rows) => self.apply_empty_fallback(question, guarded, rows).await,
                    Err(ServiceError::ExecutionError { message, sql }) => {
                        Err(ServiceError::RetryExhausted { message, sql })
                    }
                    Err(other) => Err(other),
                }
            }
            Err(other) => Err(other),
        }
    }

    async fn apply_empty_fallback(
        &self,
        question: &str,
        guarded: GuardedSql,
        rows: Vec<ResultRow>,
    ) -> Result<(String, Vec<ResultRow>), ServiceError> {
        if !rows.is_empty() {
            return Ok((guarded.as_str().to_string(), rows));
        }
        let Some(stripped) = strip_time_filter(guarded.as_str()) else {
            return Ok((guarded.as_str().to_string(), rows));
        };
        let Ok(reguarded) = guard(&stripped, &self.schema, self.config.max_limit) else {
            return Ok((guarded.as_str().to_string(), rows));
        };
        warn!(question, "empty result with a time filter, retrying without it");
        match self.executor.execute(&reguarded, self.config.statement_timeout_ms).await {
            Ok(rows) => Ok((reguarded.as_str().to_string(), rows)),
            Err(_) => Ok((guarded.as_str().to_string(), Vec::new())),
        }
    }

    async fn summarize(&self, question: &str, rows: &[ResultRow]) -> String {
        let sample: Vec<_> = rows.iter().take(50).collect();
        let rows_json = serde_json::to_string(&sample).unwrap_or_else(|_| "[]".to_string());
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(
                    "Summarize the following query result in 1-2 plain-English sentences. \
                     Refer only to numbers that appear in the rows. Do not invent data.",
                ),
                ChatMessage::user(format!("Question: {question}\nRows: {rows_json}")),
            ],
        };
        match self.summarizer.complete(request).await {
            Ok(reply) if !reply.content.trim().is_empty() => reply.content,
            _ => format!("Returned {} row(s).", rows.len()),
        }
    }
}

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static TICKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(usdc|usdt|dai|wbtc|weth|eth|btc)\b").unwrap()
});
static BARE_ETH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bETH\b").unwrap());

const UTILIZATION_TYPOS: &[&str] = &["utilisation", "utilzation", "utiliztion", "utilizaton"];

fn normalize_question(question: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(question.trim(), " ").into_owned();
    let fixed = fix_utilization_typos(&collapsed);
    let uppercased = TICKER_RE
        .replace_all(&fixed, |caps: &regex::Captures| caps[1].to_uppercase())
        .into_owned();
    BARE_ETH_RE.replace_all(&uppercased, "WETH").into_owned()
}

fn fix_utilization_typos(question: &str) -> String {
    let mut out = question.to_string();
    for typo in UTILIZATION_TYPOS {
        let re = Regex::new(&format!(r"(?i)\b{typo}\b")).expect("valid generated regex");
        out = re.replace_all(&out, "utilization").into_owned();
    }
    out
}

struct FastPathPlan {
    sql: String,
    symbol: String,
    metric_column: String,
}

static FAST_PATH_TRIGGER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(latest|most recent|current)\b").unwrap());
static FAST_PATH_DOMAIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\butilization\b").unwrap());
static FAST_PATH_SYMBOL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Z]{2,6})\b").unwrap());

/// Matches `latest/most recent/current` + lending-utilization questions and
/// synthesizes a hand-written query that trivially passes the Guard,
/// bypassing the Planner and HeuristicRewriter.
fn fast_path(question: &str, config: &FastPathConfig) -> Option<FastPathPlan> {
    if !FAST_PATH_TRIGGER_RE.is_match(question) || !FAST_PATH_DOMAIN_RE.is_match(question) {
        return None;
    }
    let symbol = FAST_PATH_SYMBOL_RE.captures(question).map(|c| c[1].to_string())?;
    let metric = &config.metric_column;
    let sql = format!(
        "SELECT ts, {metric}, ROUND({metric}*100,2) AS {metric}_pct FROM {table} \
         WHERE protocol='{protocol}' AND symbol='{symbol}' ORDER BY ts DESC LIMIT 1",
        table = config.table,
        protocol = config.protocol,
    );
    Some(FastPathPlan {
        sql,
        symbol,
        metric_column: metric.clone(),
    })
}

fn fast_path_answer(plan: &FastPathPlan, rows: &[ResultRow]) -> String {
    let pct_col = format!("{}_pct", plan.metric_column);
    match rows.first().and_then(|row| row.get(&pct_col)).and_then(|v| v.as_f64()) {
        Some(pct) => format!("Latest {} {} is {:.2}%.", plan.symbol, plan.metric_column, pct),
        None => format!("No recent data found for {}.", plan.symbol),
    }
}

static TS_GE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bts\s*>=").unwrap());
static CLAUSE_KEYWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bAND\b|\bOR\b|\bORDER BY\b|\bLIMIT\b").unwrap());

/// Strips the sole `ts >=` time filter so the Coordinator can retry once on
/// an empty result. Returns `None` (skip the fallback, never guess) if there
/// is no such filter, or more than one — a nested filter can't be stripped
/// safely by this textual rule.
fn strip_time_filter(sql: &str) -> Option<String> {
    let masked = mask_string_literals(sql);
    let matches: Vec<_> = TS_GE_RE.find_iter(&masked).collect();
    if matches.len() != 1 {
        return None;
    }
    let m = matches[0];

    let clause_end = m.end() + find_clause_end(&masked[m.end()..]);

    let prefix = masked[..m.start()].trim_end();
    let lower_prefix = prefix.to_lowercase();

    if lower_prefix.ends_with("and") {
        let and_start = prefix.len() - 3;
        let mut out = sql.to_string();
        out.replace_range(and_start..clause_end, "");
        Some(out)
    } else if lower_prefix.ends_with("where") {
        let where_start = prefix.len() - 5;
        // The removed span eats the whitespace separating the clause from
        // whatever follows (consistent with the AND branch); put it back
        // unless what follows is a closing paren or nothing at all.
        let needs_space = !matches!(masked[clause_end..].chars().next(), None | Some(')'));
        let replacement = if needs_space { "WHERE 1=1 " } else { "WHERE 1=1" };
        let mut out = sql.to_string();
        out.replace_range(where_start..clause_end, replacement);
        Some(out)
    } else {
        None
    }
}

/// Finds the end of a `ts >= ...` clause within `tail`, the masked text
/// immediately after the `>=`. Stops at the first statement-scope
/// (paren-depth 0) `)`, `AND`, `OR`, `ORDER BY`, or `LIMIT`. A `(`/`)` pair
/// opened within the clause itself (e.g. `NOW()`, a correlated subquery) is
/// tracked so its closing paren doesn't end the clause early.
fn find_clause_end(tail: &str) -> usize {
    let close_paren = first_depth_zero_close_paren(tail);
    let keyword = CLAUSE_KEYWORD_RE
        .find_iter(tail)
        .map(|m| m.start())
        .find(|&start| paren_depth_before(tail, start) == 0);

    [close_paren, keyword].into_iter().flatten().min().unwrap_or(tail.len())
}

fn first_depth_zero_close_paren(tail: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (i, b) in tail.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

fn paren_depth_before(tail: &str, byte_pos: usize) -> i32 {
    let mut depth = 0i32;
    for b in tail.as_bytes()[..byte_pos].iter() {
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {}
        }
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_whitespace_typos_and_tickers() {
        let out = normalize_question("  what   is  usdc  utilzation  for eth ");
        assert_eq!(out, "what is USDC utilization for WETH");
    }

    #[test]
    fn does_not_rewrite_eth_inside_weth() {
        let out = normalize_question("weth utilization");
        assert_eq!(out, "WETH utilization");
    }

    #[test]
    fn fast_path_matches_latest_utilization_question() {
        let config = FastPathConfig::default();
        let plan = fast_path("What is the latest USDC utilization?", &config).unwrap();
        assert!(plan.sql.contains("symbol='USDC'"));
        assert!(plan.sql.contains("ORDER BY ts DESC LIMIT 1"));
    }

    #[test]
    fn fast_path_does_not_match_without_a_trigger_word() {
        let config = FastPathConfig::default();
        assert!(fast_path("What is USDC utilization over the last week?", &config).is_none());
    }

    #[test]
    fn strips_an_and_prefixed_time_filter_and_keeps_later_conditions() {
        let sql = "SELECT * FROM public.market_data WHERE protocol='aave' AND ts >= NOW() - INTERVAL '7 days' AND symbol='WETH' LIMIT 500";
        let out = strip_time_filter(sql).unwrap();
        assert!(!out.contains("ts >="));
        assert!(out.contains("symbol='WETH'"));
    }

    #[test]
    fn rewrites_a_leading_where_time_filter_to_where_1_equals_1() {
        let sql = "SELECT * FROM public.market_data WHERE ts >= NOW() - INTERVAL '7 days' AND symbol='WETH' LIMIT 500";
        let out = strip_time_filter(sql).unwrap();
        assert!(out.contains("WHERE 1=1 AND symbol='WETH'"));
    }

    #[test]
    fn skips_the_fallback_when_there_is_no_time_filter() {
        let sql = "SELECT * FROM public.market_data WHERE symbol='WETH' LIMIT 500";
        assert!(strip_time_filter(sql).is_none());
    }

    #[test]
    fn skips_the_fallback_on_nested_time_filters_rather_than_guess() {
        let sql = "SELECT * FROM public.market_data WHERE ts >= NOW() - INTERVAL '7 days' AND id IN (SELECT id FROM public.market_data WHERE ts >= NOW() - INTERVAL '1 day')";
        assert!(strip_time_filter(sql).is_none());
    }
}

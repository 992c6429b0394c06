//! The Guard: a defensive, lexical (not grammatical) safety filter.
//!
//! Accepts or rejects a candidate SQL string per the rules enumerated in the
//! component design: exactly one read-only statement, confined to the
//! declared tables/columns, with a clamped `LIMIT`. This is deliberately not
//! a full SQL parser — see the design notes on why a hand-written scanner
//! over masked text is the right tradeoff here.

mod mask;
mod scan;

use std::collections::BTreeSet;

use thiserror::Error;

pub use mask::mask_string_literals;

use crate::schema::SchemaRegistry;

/// A statement proven to satisfy every Guard rule. Exists only between
/// Guard acceptance and Executor completion; never constructed except by
/// `guard()`.
#[derive(Debug, Clone)]
pub struct GuardedSql(String);

impl GuardedSql {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GuardedSql {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, Clone)]
pub enum GuardError {
    #[error("statement is empty")]
    EmptyStatement { sql: String },
    #[error("candidate SQL contains more than one statement")]
    MultiStatement { sql: String },
    #[error("statement is not a read-only SELECT/WITH query")]
    NotReadOnly { sql: String },
    #[error("SQL comments are not allowed")]
    CommentNotAllowed { sql: String },
    #[error("statement references a system schema")]
    SystemSchema { sql: String },
    #[error("table '{name}' is not in the declared allow-list")]
    TableNotAllowed { name: String, sql: String },
    #[error("column '{table}.{column}' is not in the declared allow-list")]
    ColumnNotAllowed {
        table: String,
        column: String,
        sql: String,
    },
}

impl GuardError {
    /// A short machine-readable discriminant surfaced to HTTP clients.
    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::EmptyStatement { .. } => "empty_statement",
            GuardError::MultiStatement { .. } => "multi_statement",
            GuardError::NotReadOnly { .. } => "not_read_only",
            GuardError::CommentNotAllowed { .. } => "comment_not_allowed",
            GuardError::SystemSchema { .. } => "system_schema",
            GuardError::TableNotAllowed { .. } => "table_not_allowed",
            GuardError::ColumnNotAllowed { .. } => "column_not_allowed",
        }
    }

    pub fn sql(&self) -> &str {
        match self {
            GuardError::EmptyStatement { sql }
            | GuardError::MultiStatement { sql }
            | GuardError::NotReadOnly { sql }
            | GuardError::CommentNotAllowed { sql }
            | GuardError::SystemSchema { sql }
            | GuardError::TableNotAllowed { sql, .. }
            | GuardError::ColumnNotAllowed { sql, .. } => sql,
        }
    }
}

pub const DEFAULT_MAX_LIMIT: i64 = 500;

/// Set-returning functions permitted in `FROM` despite not being declared
/// tables.
const SRF_ALLOW_LIST: &[&str] = &["generate_series", "unnest"];

/// Validates `sql` against `registry` and returns a normalized, LIMIT-clamped
/// statement, or the specific rule that rejected it.
pub fn guard(
    sql: &str,
    registry: &SchemaRegistry,
    max_limit: i64,
) -> Result<GuardedSql, GuardError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(GuardError::EmptyStatement {
            sql: sql.to_string(),
        });
    }

    // Strip exactly one optional trailing ';' before the statement-count
    // check, so a single terminated statement isn't rejected as multi.
    let sql_no_trailing_semi = strip_one_trailing_semicolon(trimmed);
    let masked = mask_string_literals(sql_no_trailing_semi);

    if masked.contains(';') {
        return Err(GuardError::MultiStatement {
            sql: sql.to_string(),
        });
    }

    if !scan::starts_with_select_or_with(&masked) {
        return Err(GuardError::NotReadOnly {
            sql: sql.to_string(),
        });
    }

    if scan::contains_comment(&masked) {
        return Err(GuardError::CommentNotAllowed {
            sql: sql.to_string(),
        });
    }

    if scan::contains_write_or_ddl_keyword(&masked) {
        return Err(GuardError::NotReadOnly {
            sql: sql.to_string(),
        });
    }

    if scan::references_system_schema(&masked) {
        return Err(GuardError::SystemSchema {
            sql: sql.to_string(),
        });
    }

    let synthetic_names = scan::collect_synthetic_names(&masked);

    for table in scan::extract_table_references(&masked, SRF_ALLOW_LIST, &synthetic_names) {
        if !registry.tables_allowed().contains(&table) {
            return Err(GuardError::TableNotAllowed {
                name: table,
                sql: sql.to_string(),
            });
        }
    }

    for (qualifier, column) in
        scan::extract_column_references(&masked, SRF_ALLOW_LIST, &synthetic_names)
    {
        if let Some(allowed) = registry.columns_allowed(&qualifier) {
            if !allowed.is_empty() && !allowed.contains(&column) {
                return Err(GuardError::ColumnNotAllowed {
                    table: qualifier,
                    column,
                    sql: sql.to_string(),
                });
            }
        }
    }

    let normalized = scan::normalize_limit(sql_no_trailing_semi, &masked, max_limit);
    Ok(GuardedSql(normalized))
}

fn strip_one_trailing_semicolon(s: &str) -> &str {
    s.strip_suffix(';').unwrap_or(s).trim_end()
}

/// Exempts a qualifier from allow-list checks (SRF or alias/CTE name).
fn is_exempt(qualifier: &str, srf_allow_list: &[&str], synthetic_names: &BTreeSet<String>) -> bool {
    srf_allow_list.contains(&qualifier) || synthetic_names.contains(qualifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDecl, DeclaredSchema, TableDecl};

    fn fake_registry() -> SchemaRegistry {
        // Built without touching a live database: directly populate the
        // registry's internals through `SchemaRegistry::from_specs_for_test`.
        SchemaRegistry::from_specs_for_test(vec![
            (
                "public.market_data".to_string(),
                vec!["ts".to_string(), "utilization".to_string(), "symbol".to_string(), "protocol".to_string()],
            ),
            ("public.dex_daily".to_string(), vec!["day".to_string(), "volume".to_string()]),
        ])
    }

    #[test]
    fn accepts_simple_select_and_appends_limit() {
        let registry = fake_registry();
        let g = guard("SELECT ts FROM public.market_data", &registry, 500).unwrap();
        assert!(g.as_str().contains("LIMIT 500"));
    }

    #[test]
    fn clamps_limit_over_max() {
        let registry = fake_registry();
        let g = guard(
            "SELECT ts FROM public.market_data LIMIT 501",
            &registry,
            500,
        )
        .unwrap();
        assert!(g.as_str().contains("LIMIT 500"));
        assert!(!g.as_str().contains("LIMIT 501"));
    }

    #[test]
    fn rejects_multiple_statements() {
        let registry = fake_registry();
        let err = guard(
            "SELECT ts FROM public.market_data; SELECT 1",
            &registry,
            500,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "multi_statement");
    }

    #[test]
    fn accepts_drop_inside_a_string_literal() {
        let registry = fake_registry();
        let sql = "SELECT ts FROM public.market_data WHERE symbol = '; DROP TABLE t; --'";
        let g = guard(sql, &registry, 500).unwrap();
        assert!(g.as_str().contains("DROP TABLE t"));
    }

    #[test]
    fn rejects_drop_outside_a_literal() {
        let registry = fake_registry();
        let err = guard("DROP TABLE public.market_data", &registry, 500).unwrap_err();
        assert_eq!(err.kind(), "not_read_only");
    }

    #[test]
    fn accepts_generate_series_without_declaring_it() {
        let registry = fake_registry();
        let g = guard("SELECT * FROM generate_series(1, 10)", &registry, 500).unwrap();
        assert!(g.as_str().starts_with("SELECT"));
    }

    #[test]
    fn accepts_cte_name_without_declaring_it() {
        let registry = fake_registry();
        let sql =
            "WITH hourly AS (SELECT ts FROM public.market_data) SELECT * FROM hourly";
        let g = guard(sql, &registry, 500).unwrap();
        assert!(g.as_str().contains("hourly"));
    }

    #[test]
    fn rejects_undeclared_table() {
        let registry = fake_registry();
        let err = guard("SELECT * FROM public.secrets", &registry, 500).unwrap_err();
        assert_eq!(err.kind(), "table_not_allowed");
    }

    #[test]
    fn rejects_undeclared_column() {
        let registry = fake_registry();
        let err = guard(
            "SELECT public.market_data.password FROM public.market_data",
            &registry,
            500,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "column_not_allowed");
    }

    #[test]
    fn rejects_system_schema_reference() {
        let registry = fake_registry();
        let err = guard(
            "SELECT * FROM information_schema.columns",
            &registry,
            500,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "system_schema");
    }

    #[test]
    fn string_literal_replacement_does_not_change_the_decision() {
        let registry = fake_registry();
        let a = guard(
            "SELECT ts FROM public.market_data WHERE symbol = 'USDC'",
            &registry,
            500,
        );
        let b = guard(
            "SELECT ts FROM public.market_data WHERE symbol = 'WETHX'",
            &registry,
            500,
        );
        assert_eq!(a.is_ok(), b.is_ok());
    }
}

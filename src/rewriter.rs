//! The HeuristicRewriter: a small, enumerated catalog of deterministic
//! textual patches for recurring LLM modeling mistakes, applied before the
//! candidate SQL reaches the Guard.
//!
//! Every rewrite here is idempotent and avoids touching the content of
//! string literals, by matching against `mask_string_literals(sql)` and
//! applying the resulting byte spans to the original text (the same trick
//! the Guard uses, since masking is guaranteed to preserve byte offsets).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::guard::mask_string_literals;

/// Deployment-specific knobs: which declared columns hold a `[0,1]`
/// fraction (so a model returning a raw percent needs dividing by 100),
/// and where the minutely time series lives for the hourly-pre-aggregation
/// and percentile rewrites.
#[derive(Debug, Clone)]
pub struct RewriterConfig {
    pub bounded_fraction_columns: Vec<String>,
    pub minutely_table: String,
    pub metric_column: String,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            bounded_fraction_columns: vec!["utilization".to_string()],
            minutely_table: "public.market_data".to_string(),
            metric_column: "utilization".to_string(),
        }
    }
}

pub struct HeuristicRewriter {
    config: RewriterConfig,
}

impl HeuristicRewriter {
    pub fn new(config: RewriterConfig) -> Self {
        Self { config }
    }

    /// Applies the full catalog in order. Idempotent: calling this again on
    /// the output yields the same output.
    pub fn rewrite(&self, question: &str, sql: &str) -> String {
        let sql = self.percent_to_fraction(sql);
        let sql = self.at_least_n_normalization(question, &sql);
        let sql = self.hourly_preaggregation(question, &sql);
        self.percentile_over_rewrite(&sql)
    }

    /// 1. Comparisons against a bounded `[0,1]` column with `n >= 1` are
    /// read as a percent the model forgot to divide by 100.
    fn percent_to_fraction(&self, sql: &str) -> String {
        let mut out = sql.to_string();
        for col in &self.config.bounded_fraction_columns {
            let re = Regex::new(&format!(
                r"(?i)\b({})\b(\s*(?:=|<=|>=|<>|<|>)\s*)(\d+(?:\.\d+)?)\b",
                regex::escape(col)
            ))
            .expect("valid generated regex");

            let masked = mask_string_literals(&out);
            let mut replacements: Vec<(usize, usize, String)> = Vec::new();
            for cap in re.captures_iter(&masked) {
                // Matching against `masked` rather than `out` means a match
                // can never fall inside a string literal: the column name
                // there would be blanked out, not word characters.
                let whole = cap.get(0).unwrap();
                let n: f64 = cap[3].parse().unwrap_or(0.0);
                if n < 1.0 {
                    continue;
                }
                let fraction = (n / 100.0 * 10000.0).round() / 10000.0;
                let replacement = format!("{}{}{}", &cap[1], &cap[2], format_fraction(fraction));
                replacements.push((whole.start(), whole.end(), replacement));
            }
            for (start, end, replacement) in replacements.into_iter().rev() {
                out.replace_range(start..end, &replacement);
            }
        }
        out
    }

    /// 2. `streak_count = N` / `hours = N` becomes `>= N` when the question
    /// asked for "at least N".
    fn at_least_n_normalization(&self, question: &str, sql: &str) -> String {
        static AT_LEAST_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"(?i)\bat least (\d+)\b").unwrap());

        let Some(cap) = AT_LEAST_RE.captures(question) else {
            return sql.to_string();
        };
        let n = &cap[1];

        let re = Regex::new(&format!(r"(?i)\b(streak_count|hours)\s*=\s*{n}\b"))
            .expect("valid generated regex");
        re.replace_all(sql, format!("$1 >= {n}")).into_owned()
    }

    /// 3. Wraps a bare minutely-table reference in an hourly
    /// pre-aggregation when the question is about streaks/consecutive
    /// hours and the SQL doesn't already `date_trunc('hour', ts)`.
    fn hourly_preaggregation(&self, question: &str, sql: &str) -> String {
        static TRIGGER_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"(?i)\b(consecutive|streak|hours?)\b").unwrap());

        if !TRIGGER_RE.is_match(question) {
            return sql.to_string();
        }
        if sql.to_lowercase().contains("date_trunc('hour'") {
            return sql.to_string();
        }

        let from_re = Regex::new(&format!(
            r"(?i)\bFROM\s+{}\b",
            regex::escape(&self.config.minutely_table)
        ))
        .expect("valid generated regex");
        let Some(m) = from_re.find(sql) else {
            return sql.to_string();
        };

        let where_re = Regex::new(r"(?i)\bWHERE\b(.*?)(\bGROUP BY\b|\bORDER BY\b|\bLIMIT\b|$)")
            .expect("valid literal regex");
        let baseline_filters = where_re
            .captures(sql)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default();

        let group_by_re = Regex::new(r"(?i)\bGROUP BY\s+(.*?)(\bORDER BY\b|\bLIMIT\b|$)")
            .expect("valid literal regex");
        let dims = group_by_re
            .captures(sql)
            .map(|c| c[1].trim().trim_end_matches(',').to_string())
            .unwrap_or_default();

        let metric = &self.config.metric_column;
        let table = &self.config.minutely_table;
        let where_clause = if baseline_filters.is_empty() {
            String::new()
        } else {
            format!(" WHERE {baseline_filters}")
        };
        let group_by_clause = if dims.is_empty() {
            "GROUP BY 1".to_string()
        } else {
            format!("GROUP BY 1, {dims}")
        };
        let dims_select = if dims.is_empty() {
            String::new()
        } else {
            format!(", {dims}")
        };

        let subquery = format!(
            "(SELECT date_trunc('hour', ts) AS hour, AVG({metric}) AS {metric}{dims_select} FROM {table}{where_clause} {group_by_clause}) h"
        );

        let replacement = format!("FROM {subquery}");
        let inserted_start = m.start();
        let inserted_end = inserted_start + replacement.len();

        let mut out = sql.to_string();
        out.replace_range(m.range(), &replacement);

        // The outer query still names the raw `ts` column (e.g. in its own
        // SELECT list or ORDER BY) even though the subquery now exposes
        // `hour` instead. Rename those references, but never inside the
        // subquery we just built or inside a string literal: `ts` there is
        // either the minutely table's real column (`date_trunc('hour', ts)`)
        // or unrelated text.
        static TS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bts\b").unwrap());
        let masked = mask_string_literals(&out);
        let mut renamed = String::with_capacity(out.len());
        let mut last = 0;
        for mat in TS_RE.find_iter(&masked) {
            if mat.start() >= inserted_start && mat.end() <= inserted_end {
                continue;
            }
            renamed.push_str(&out[last..mat.start()]);
            renamed.push_str("hour");
            last = mat.end();
        }
        renamed.push_str(&out[last..]);
        renamed
    }

    /// 4. Postgres forbids `OVER` on an ordered-set aggregate; rewrite to a
    /// correlated subquery computing the same percentile over a 30-day
    /// trailing window on an hourly pre-aggregation.
    fn percentile_over_rewrite(&self, sql: &str) -> String {
        static PERCENTILE_OVER_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(
                r"(?is)percentile_cont\(\s*([0-9.]+)\s*\)\s*WITHIN\s+GROUP\s*\(\s*ORDER\s+BY\s+([A-Za-z_][A-Za-z0-9_.]*)\s*\)\s*OVER\s*\([^)]*\)",
            )
            .unwrap()
        });

        let table = &self.config.minutely_table;
        PERCENTILE_OVER_RE
            .replace_all(sql, |cap: &regex::Captures| {
                let p = &cap[1];
                let col = &cap[2];
                format!(
                    "(SELECT percentile_cont({p}) WITHIN GROUP (ORDER BY h2.{col}) \
                     FROM (SELECT date_trunc('hour', ts) AS hour, {col} FROM {table} \
                     WHERE ts >= NOW() - INTERVAL '30 days') h2)"
                )
            })
            .into_owned()
    }
}

fn format_fraction(n: f64) -> String {
    let s = format!("{n:.4}");
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter() -> HeuristicRewriter {
        HeuristicRewriter::new(RewriterConfig::default())
    }

    #[test]
    fn rewrites_percent_to_fraction() {
        let sql = "SELECT * FROM public.market_data WHERE utilization > 80";
        let out = rewriter().rewrite("", sql);
        assert!(out.contains("utilization > 0.8"));
    }

    #[test]
    fn leaves_fractions_already_in_0_1_range_untouched() {
        let sql = "SELECT * FROM public.market_data WHERE utilization > 0.8";
        let out = rewriter().rewrite("", sql);
        assert!(out.contains("utilization > 0.8"));
    }

    #[test]
    fn does_not_touch_percent_inside_a_string_literal() {
        let sql = "SELECT * FROM public.market_data WHERE label = 'utilization > 80'";
        let out = rewriter().rewrite("", sql);
        assert!(out.contains("'utilization > 80'"));
    }

    #[test]
    fn normalizes_at_least_n_to_gte() {
        let sql = "SELECT * FROM public.market_data WHERE streak_count = 5";
        let out = rewriter().rewrite("at least 5 hours in a row", sql);
        assert!(out.contains("streak_count >= 5"));
    }

    #[test]
    fn is_idempotent() {
        let sql = "SELECT * FROM public.market_data WHERE utilization > 80 AND streak_count = 5";
        let question = "at least 5 consecutive hours";
        let once = rewriter().rewrite(question, sql);
        let twice = rewriter().rewrite(question, &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn rewrites_percentile_cont_over_to_correlated_subquery() {
        let sql = "SELECT percentile_cont(0.5) WITHIN GROUP (ORDER BY utilization) OVER (PARTITION BY symbol) FROM public.market_data";
        let out = rewriter().rewrite("", sql);
        assert!(!out.to_uppercase().contains(") OVER ("));
        assert!(out.contains("percentile_cont(0.5)"));
    }
}

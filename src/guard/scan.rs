use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::is_exempt;

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "UPDATE", "INSERT", "DELETE", "DROP", "ALTER", "TRUNCATE", "CREATE", "GRANT", "REVOKE",
    "COPY", "VACUUM", "ANALYZE",
];

const SYSTEM_SCHEMAS: &[&str] = &["pg_catalog", "pg_toast", "information_schema"];

static FORBIDDEN_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation = FORBIDDEN_KEYWORDS.join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).unwrap()
});

static SYSTEM_SCHEMA_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation = SYSTEM_SCHEMAS.join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).unwrap()
});

static DERIVED_ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\)\s*(?:AS\s+)?([A-Za-z_][A-Za-z0-9_]*)\b").unwrap());

static CTE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\bWITH\b|,)\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\([^()]*\))?\s*\bAS\b\s*\(")
        .unwrap()
});

static FROM_JOIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?)\s*(\()?")
        .unwrap()
});

static QUALIFIED_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)(?:\.([A-Za-z_][A-Za-z0-9_]*))?\b",
    )
    .unwrap()
});

static LIMIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)\b").unwrap());

pub fn starts_with_select_or_with(masked: &str) -> bool {
    let trimmed = masked.trim_start();
    let lower_prefix: String = trimmed.chars().take(6).collect::<String>().to_lowercase();
    lower_prefix.starts_with("select") && next_is_boundary(trimmed, 6)
        || lower_prefix.starts_with("with") && next_is_boundary(trimmed, 4)
}

fn next_is_boundary(s: &str, idx: usize) -> bool {
    match s.as_bytes().get(idx) {
        None => true,
        Some(b) => !(b.is_ascii_alphanumeric() || *b == b'_'),
    }
}

pub fn contains_comment(masked: &str) -> bool {
    masked.contains("--") || masked.contains("/*") || masked.contains("*/")
}

pub fn contains_write_or_ddl_keyword(masked: &str) -> bool {
    FORBIDDEN_KEYWORD_RE.is_match(masked)
}

pub fn references_system_schema(masked: &str) -> bool {
    SYSTEM_SCHEMA_RE.is_match(masked)
}

/// Derived-table aliases (`) name`) and CTE names (`WITH name AS (`, `, name AS (`).
pub fn collect_synthetic_names(masked: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for cap in DERIVED_ALIAS_RE.captures_iter(masked) {
        names.insert(cap[1].to_lowercase());
    }
    for cap in CTE_NAME_RE.captures_iter(masked) {
        names.insert(cap[1].to_lowercase());
    }
    names
}

fn normalize_table_name(raw: &str) -> String {
    let lower = raw.to_lowercase();
    if lower.contains('.') {
        lower
    } else {
        format!("public.{lower}")
    }
}

/// Tables referenced after `FROM`/`JOIN`, normalized to the registry's
/// `schema.table` storage style. SRF calls and alias/CTE references are
/// skipped.
pub fn extract_table_references(
    masked: &str,
    srf_allow_list: &[&str],
    synthetic_names: &BTreeSet<String>,
) -> Vec<String> {
    let mut tables = Vec::new();
    for cap in FROM_JOIN_RE.captures_iter(masked) {
        let raw = &cap[1];
        let is_call = cap.get(2).is_some();
        let base_name = raw.rsplit('.').next().unwrap_or(raw).to_lowercase();

        if is_call {
            // Function call in FROM position: accept only allow-listed SRFs;
            // anything else is surfaced as an unknown "table" so the caller
            // rejects it rather than silently trusting an arbitrary call.
            if !srf_allow_list.contains(&base_name.as_str()) {
                tables.push(base_name);
            }
            continue;
        }

        if is_exempt(&raw.to_lowercase(), srf_allow_list, synthetic_names) {
            continue;
        }

        tables.push(normalize_table_name(raw));
    }
    tables
}

/// `qualifier.column` references outside of table position, normalized the
/// same way as table names so lookups against the registry line up.
pub fn extract_column_references(
    masked: &str,
    srf_allow_list: &[&str],
    synthetic_names: &BTreeSet<String>,
) -> Vec<(String, String)> {
    let table_ref_starts: BTreeSet<usize> = FROM_JOIN_RE
        .captures_iter(masked)
        .filter_map(|cap| cap.get(1).map(|m| m.start()))
        .collect();

    let mut columns = Vec::new();
    for cap in QUALIFIED_COLUMN_RE.captures_iter(masked) {
        let whole = cap.get(0).unwrap();
        if table_ref_starts.contains(&whole.start()) {
            continue;
        }
        // A three-part `schema.table.column` reference: the registry stores
        // tables as `schema.table`, so the first two segments are the
        // qualifier and the third is the column, not the first segment alone.
        let (qualifier, column) = match cap.get(3) {
            Some(third) => (format!("{}.{}", &cap[1], &cap[2]), third.as_str().to_lowercase()),
            None => (cap[1].to_string(), cap[2].to_lowercase()),
        };
        if is_exempt(&qualifier.to_lowercase(), srf_allow_list, synthetic_names) {
            continue;
        }
        columns.push((normalize_table_name(&qualifier), column));
    }
    columns
}

/// Clamps every top-level (paren-depth 0) `LIMIT n` to `max_limit`, or
/// appends one if none exists at statement scope. Subquery `LIMIT`s are
/// left untouched.
pub fn normalize_limit(original: &str, masked: &str, max_limit: i64) -> String {
    let mut depth_zero_matches: Vec<(usize, usize, i64)> = Vec::new();
    for cap in LIMIT_RE.captures_iter(masked) {
        let whole = cap.get(0).unwrap();
        if paren_depth_at(masked, whole.start()) == 0 {
            let n: i64 = cap[1].parse().unwrap_or(max_limit);
            depth_zero_matches.push((whole.start(), whole.end(), n));
        }
    }

    if depth_zero_matches.is_empty() {
        return format!("{original}\nLIMIT {max_limit}");
    }

    let mut out = original.to_string();
    for (start, end, n) in depth_zero_matches.into_iter().rev() {
        let clamped = n.min(max_limit);
        out.replace_range(start..end, &format!("LIMIT {clamped}"));
    }
    out
}

fn paren_depth_at(masked: &str, byte_pos: usize) -> i32 {
    let mut depth = 0i32;
    for b in masked.as_bytes()[..byte_pos].iter() {
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {}
        }
    }
    depth
}

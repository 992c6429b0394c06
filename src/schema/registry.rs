use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use super::declared::DeclaredSchema;

/// A single declared table: its allow-listed columns and the text shown to
/// the LLM for it. Immutable after `SchemaRegistry::load`.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub fqtn: String,
    pub description: String,
    /// column name -> descriptive text, in declaration order
    pub columns: Vec<(String, String)>,
    pub primary_key: Vec<String>,
}

#[derive(Debug, Error)]
#[error("declared table '{table}' has no matching columns in information_schema.columns")]
pub struct SchemaMismatch {
    pub table: String,
}

/// Holds the allow-list of tables/columns and the stable doc rendered for
/// the LLM. Owned exclusively by `AppState`; shared read-only thereafter.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: BTreeSet<String>,
    cols_by_table: BTreeMap<String, BTreeSet<String>>,
    doc: String,
    specs: Vec<TableSpec>,
}

impl SchemaRegistry {
    /// Verifies every declared table against the live database and builds
    /// the registry. Fails with `SchemaMismatch` if a declared table has no
    /// columns in `information_schema.columns`.
    pub async fn load(declaration: &DeclaredSchema, pool: &PgPool) -> anyhow::Result<Self> {
        let mut tables = BTreeSet::new();
        let mut cols_by_table = BTreeMap::new();
        let mut specs = Vec::new();

        for decl in &declaration.tables {
            let fqtn = decl.name.to_lowercase();
            let (schema_name, table_name) = split_fqtn(&fqtn);

            let live_columns: Vec<String> = sqlx::query_scalar(
                "SELECT lower(column_name) FROM information_schema.columns \
                 WHERE lower(table_schema) = $1 AND lower(table_name) = $2",
            )
            .bind(&schema_name)
            .bind(&table_name)
            .fetch_all(pool)
            .await?;

            if live_columns.is_empty() {
                return Err(SchemaMismatch { table: fqtn }.into());
            }

            let live: BTreeSet<String> = live_columns.into_iter().collect();

            // Declared columns must be a subset of what's actually live; we
            // only ever grant what the declaration asked for.
            let declared_cols: Vec<(String, String)> = decl
                .columns
                .iter()
                .map(|c| (c.name.to_lowercase(), c.description.clone()))
                .filter(|(name, _)| live.contains(name))
                .collect();

            let allowed: BTreeSet<String> =
                declared_cols.iter().map(|(name, _)| name.clone()).collect();

            tables.insert(fqtn.clone());
            cols_by_table.insert(fqtn.clone(), allowed);
            specs.push(TableSpec {
                fqtn,
                description: decl.description.clone(),
                columns: declared_cols,
                primary_key: decl.primary_key.iter().map(|c| c.to_lowercase()).collect(),
            });
        }

        let doc = render_doc(&specs);

        info!(tables = tables.len(), "schema registry loaded");

        Ok(Self {
            tables,
            cols_by_table,
            doc,
            specs,
        })
    }

    pub fn tables_allowed(&self) -> &BTreeSet<String> {
        &self.tables
    }

    /// Builds a registry directly from `(fqtn, columns)` pairs, bypassing
    /// the live-database reconciliation in `load`. Used by Guard's unit
    /// tests and by integration tests that exercise the router without a
    /// live database to check against.
    pub fn from_specs_for_test(tables: Vec<(String, Vec<String>)>) -> Self {
        let mut all_tables = BTreeSet::new();
        let mut cols_by_table = BTreeMap::new();
        let mut specs = Vec::new();
        for (fqtn, cols) in tables {
            all_tables.insert(fqtn.clone());
            cols_by_table.insert(fqtn.clone(), cols.iter().cloned().collect());
            specs.push(TableSpec {
                fqtn: fqtn.clone(),
                description: String::new(),
                columns: cols.into_iter().map(|c| (c, String::new())).collect(),
                primary_key: Vec::new(),
            });
        }
        let doc = render_doc(&specs);
        Self {
            tables: all_tables,
            cols_by_table,
            doc,
            specs,
        }
    }

    /// May be empty only if the table has no declared columns, in which
    /// case column-level checks are skipped for it by the caller.
    pub fn columns_allowed(&self, fqtn: &str) -> Option<&BTreeSet<String>> {
        self.cols_by_table.get(fqtn)
    }

    pub fn doc(&self) -> &str {
        &self.doc
    }

    pub fn specs(&self) -> &[TableSpec] {
        &self.specs
    }
}

fn split_fqtn(fqtn: &str) -> (String, String) {
    match fqtn.split_once('.') {
        Some((schema, table)) => (schema.to_string(), table.to_string()),
        None => ("public".to_string(), fqtn.to_string()),
    }
}

/// Stable textual rendering: one block per table, in declaration order.
fn render_doc(specs: &[TableSpec]) -> String {
    let mut doc = String::new();
    for spec in specs {
        let _ = writeln!(doc, "{} — {}", spec.fqtn, spec.description);
        doc.push_str("columns:\n");
        for (name, desc) in &spec.columns {
            let _ = writeln!(doc, "- {}: {}", name, desc);
        }
        if !spec.primary_key.is_empty() {
            let _ = writeln!(doc, "primary_key: [{}]", spec.primary_key.join(", "));
        }
        doc.push('\n');
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(fqtn: &str) -> TableSpec {
        TableSpec {
            fqtn: fqtn.to_string(),
            description: "test table".to_string(),
            columns: vec![
                ("ts".to_string(), "timestamp".to_string()),
                ("symbol".to_string(), "asset symbol".to_string()),
            ],
            primary_key: vec!["ts".to_string()],
        }
    }

    #[test]
    fn doc_is_stable_and_matches_the_declared_format() {
        let specs = vec![spec("public.market_data")];
        let doc = render_doc(&specs);
        assert_eq!(
            doc,
            "public.market_data — test table\ncolumns:\n- ts: timestamp\n- symbol: asset symbol\nprimary_key: [ts]\n\n"
        );
    }

    #[test]
    fn split_fqtn_defaults_missing_schema_to_public() {
        assert_eq!(split_fqtn("market_data"), ("public".to_string(), "market_data".to_string()));
        assert_eq!(
            split_fqtn("analytics.dex_daily"),
            ("analytics".to_string(), "dex_daily".to_string())
        );
    }
}

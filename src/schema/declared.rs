//! The on-disk configuration asset `SchemaRegistry::load` reads at startup.
//!
//! TOML rather than JSON/YAML: it is the format the rest of the LLM-tooling
//! corpus reaches for when a build-time asset needs to stay human-editable,
//! and it is a natural fit for `serde`'s `derive(Deserialize)`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDecl {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableDecl {
    /// Fully-qualified `schema.table`, as it should appear in SQL.
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub columns: Vec<ColumnDecl>,
    #[serde(default)]
    pub primary_key: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeclaredSchema {
    #[serde(default)]
    pub tables: Vec<TableDecl>,
}

impl DeclaredSchema {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("failed to parse declared schema TOML")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read declared schema at {}", path.display()))?;
        Self::from_toml_str(&raw)
    }
}

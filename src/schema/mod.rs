//! The declared schema: the allow-list the rest of the pipeline trusts.

mod declared;
mod registry;

pub use declared::{ColumnDecl, DeclaredSchema, TableDecl};
pub use registry::{SchemaMismatch, SchemaRegistry, TableSpec};

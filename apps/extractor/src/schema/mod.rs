//! Extraction schema: the user-configurable set of typed fields to pull out of a résumé.
//!
//! A schema is parsed once per batch and then shared read-only (`Arc<Schema>`) by
//! every extraction task.

pub mod defaults;
pub mod model;
pub mod rules;

use std::path::Path;

use anyhow::{Context, Result};

pub use model::{
    Property, PropertyType, ScalarType, Schema, SchemaError, SchemaVariable, StringFormat,
    VariableType,
};
pub use rules::{FieldCheck, FieldRule, NumericRange, ValidationRules};

/// Reads and parses a schema file. Used for `DEFAULT_SCHEMA_PATH` at startup.
pub fn load_schema_file(path: &Path) -> Result<Schema> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file '{}'", path.display()))?;
    Schema::parse(&raw).with_context(|| format!("Invalid schema in '{}'", path.display()))
}

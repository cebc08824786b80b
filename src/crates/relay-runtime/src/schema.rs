//! JSON-schema validation for workflow inputs
//!
//! Validation failures are returned as structured `{path, message}` values
//! and never thrown across task boundaries: a rejected resume keeps the
//! task paused and hands the errors back to the caller.

use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One structured validation failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaError {
    /// JSON pointer to the offending value (empty for root)
    pub path: String,
    pub message: String,
}

impl SchemaError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Validate `instance` against `schema`, collecting every failure
pub fn validate_value(schema: &Value, instance: &Value) -> Result<(), Vec<SchemaError>> {
    let compiled = match JSONSchema::compile(schema) {
        Ok(compiled) => compiled,
        Err(err) => {
            return Err(vec![SchemaError::new("", format!("invalid schema: {err}"))]);
        }
    };

    // Errors borrow the compiled schema; materialize owned values before it
    // drops.
    let collected = match compiled.validate(instance) {
        Ok(()) => None,
        Err(errors) => Some(
            errors
                .map(|e| SchemaError::new(e.instance_path.to_string(), e.to_string()))
                .collect::<Vec<_>>(),
        ),
    };

    match collected {
        None => Ok(()),
        Some(errors) => Err(errors),
    }
}

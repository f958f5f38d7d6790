//! Configuration validation.
//!
//! Validates a [`ResourceConfig`] against a [`BlockSchema`] before diffing.
//! Problems are collected as a list of [`Diagnostic`]s rather than aborting
//! early, so every issue is reported in one pass.
//!
//! # Example
//!
//! ```
//! use hemmer_schema_diff::{AttributeSchema, BlockSchema, ResourceConfig};
//! use hemmer_schema_diff::validation::validate;
//! use serde_json::json;
//!
//! let schema = BlockSchema::new()
//!     .with_attribute("name", AttributeSchema::required_string())
//!     .with_attribute("count", AttributeSchema::optional_int());
//!
//! let config = ResourceConfig::new(json!({ "name": "test", "count": 42 }));
//! assert!(validate(&schema, &config).is_empty());
//!
//! let config = ResourceConfig::new(json!({ "count": "not a number" }));
//! let diagnostics = validate(&schema, &config);
//! assert_eq!(diagnostics.len(), 2);
//! ```

use serde_json::Value;

use crate::reader::ResourceConfig;
use crate::schema::{
    AttributeSchema, BlockSchema, Diagnostic, DiagnosticSeverity, SchemaElement, ValueKind,
};

/// Validate a configuration against a schema.
///
/// Returns a list of diagnostics for any problems found; an empty list means
/// the configuration is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null (unless not yet known)
/// - Optional attributes may be absent or null
/// - Computed-only attributes are skipped (the provider sets these)
/// - Values must match the declared attribute kind
/// - `conflicts_with` pairs may not be set together
/// - Keys not declared in the schema are rejected
pub fn validate(schema: &BlockSchema, config: &ResourceConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    for (name, attr) in &schema.attributes {
        validate_attribute(schema, config, name, attr, &mut diagnostics);
    }

    if let Value::Object(root) = config.raw() {
        for key in root.keys() {
            if schema.get(key).is_none() {
                diagnostics.push(
                    Diagnostic::error(format!("Unsupported argument '{}'", key))
                        .with_detail("This attribute is not declared in the schema")
                        .with_attribute(key.clone()),
                );
            }
        }
    }

    diagnostics
}

/// Validate a configuration, returning `Ok` if valid or the diagnostics
/// otherwise.
pub fn validate_result(
    schema: &BlockSchema,
    config: &ResourceConfig,
) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, config);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Whether a configuration is valid against a schema.
///
/// Use [`validate`] to get detailed error information.
pub fn is_valid(schema: &BlockSchema, config: &ResourceConfig) -> bool {
    validate(schema, config).is_empty()
}

fn validate_attribute(
    schema: &BlockSchema,
    config: &ResourceConfig,
    path: &str,
    attr: &AttributeSchema,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // The provider sets computed-only attributes.
    if attr.is_computed_only() {
        return;
    }
    // A value pending computation cannot be checked yet.
    if config.is_computed(path) {
        return;
    }

    let value = config.get(path);
    match value {
        None | Some(Value::Null) => {
            if attr.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            validate_kind(config, path, attr, v, diagnostics);
            for conflict in &attr.conflicts_with {
                if matches!(config.get(conflict), Some(other) if !other.is_null()) {
                    diagnostics.push(
                        Diagnostic::error(format!(
                            "'{}' conflicts with '{}'",
                            path, conflict
                        ))
                        .with_detail("These attributes may not be set together")
                        .with_attribute(path),
                    );
                }
            }
        },
    }
}

fn validate_kind(
    config: &ResourceConfig,
    path: &str,
    attr: &AttributeSchema,
    value: &Value,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr.kind {
        ValueKind::String => {
            if !value.is_string() && !value.is_boolean() && !value.is_number() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        ValueKind::Int => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int", value));
            }
        },
        ValueKind::Float => {
            let ok = value.is_number()
                || matches!(value, Value::String(s) if s.parse::<f64>().is_ok());
            if !ok {
                diagnostics.push(type_error(path, "float", value));
            }
        },
        ValueKind::Bool => {
            let ok = value.is_boolean()
                || matches!(value, Value::String(s) if matches!(s.as_str(), "true" | "false" | "1" | "0"));
            if !ok {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        ValueKind::List | ValueKind::Set => {
            let Some(items) = value.as_array() else {
                diagnostics.push(type_error(path, "list", value));
                return;
            };
            let Some(elem) = &attr.elem else { return };
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{}.{}", path, i);
                if config.is_computed(&item_path) {
                    continue;
                }
                match elem {
                    SchemaElement::Primitive(p) => {
                        validate_kind(config, &item_path, p, item, diagnostics);
                    },
                    SchemaElement::Block(block) => {
                        validate_block(config, &item_path, block, item, diagnostics);
                    },
                }
            }
        },
        ValueKind::Map => {
            let Some(entries) = value.as_object() else {
                diagnostics.push(type_error(path, "map", value));
                return;
            };
            let value_attr = match &attr.elem {
                Some(SchemaElement::Primitive(p)) => (**p).clone(),
                _ => AttributeSchema::new(ValueKind::String),
            };
            for (key, entry) in entries {
                let entry_path = format!("{}.{}", path, key);
                if config.is_computed(&entry_path) || entry.is_null() {
                    continue;
                }
                validate_kind(config, &entry_path, &value_attr, entry, diagnostics);
            }
        },
    }
}

fn validate_block(
    config: &ResourceConfig,
    path: &str,
    block: &BlockSchema,
    value: &Value,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(obj) = value.as_object() else {
        diagnostics.push(
            Diagnostic::error(format!("Expected object for block '{}'", path))
                .with_detail(format!("Got {}", value_type_name(value)))
                .with_attribute(path),
        );
        return;
    };

    for (name, attr) in &block.attributes {
        let field_path = format!("{}.{}", path, name);
        validate_attribute_in_block(config, &field_path, attr, obj.get(name), diagnostics);
    }
    for key in obj.keys() {
        if block.get(key).is_none() {
            diagnostics.push(
                Diagnostic::error(format!("Unsupported argument '{}.{}'", path, key))
                    .with_attribute(format!("{}.{}", path, key)),
            );
        }
    }
}

fn validate_attribute_in_block(
    config: &ResourceConfig,
    path: &str,
    attr: &AttributeSchema,
    value: Option<&Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.is_computed_only() || config.is_computed(path) {
        return;
    }
    match value {
        None | Some(Value::Null) => {
            if attr.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_attribute(path),
                );
            }
        },
        Some(v) => validate_kind(config, path, attr, v, diagnostics),
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            if n.as_i64().is_some() {
                true
            } else if let Some(f) = n.as_f64() {
                // A float that is actually an integer
                f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
            } else {
                false
            }
        },
        Value::String(s) => s.parse::<i64>().is_ok(),
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic {
        severity: DiagnosticSeverity::Error,
        summary: format!("Invalid type for attribute '{}'", path),
        detail: Some(format!(
            "Expected {}, got {}",
            expected,
            value_type_name(got)
        )),
        attribute: Some(path.to_string()),
    }
}

// ambassador-core/src/core/validate.rs
// ============================================================================
// Module: Argument Validator
// Description: Hand-rolled shape validation for tool invocation arguments.
// Purpose: Reject malformed arguments before they ever reach a downstream
//          tool server, without incurring the cost of a general JSON Schema
//          engine on every invocation's hot path.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Tool argument schemas are restricted to a small, closed shape language
//! (object / array / string / number / integer / boolean / enum), declared
//! once per tool at catalog publish time. [`jsonschema`] validates that the
//! declared schema itself is well-formed JSON Schema at publish time; this
//! module re-implements only the subset of validation semantics the
//! Ambassador actually needs and runs it on every invocation, because a
//! general schema engine is too heavy to run per-call (spec.md §4.11).

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Schema
// ============================================================================

/// A single property's declared shape within an [`ArgSchema`] object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// A JSON string, optionally length-capped.
    String {
        /// Maximum accepted length, in UTF-8 bytes.
        max_length: Option<usize>,
    },
    /// A JSON number restricted to integer values.
    Integer {
        /// Inclusive lower bound.
        minimum: Option<i64>,
        /// Inclusive upper bound.
        maximum: Option<i64>,
    },
    /// Any JSON number.
    Number {
        /// Inclusive lower bound.
        minimum: Option<f64>,
        /// Inclusive upper bound.
        maximum: Option<f64>,
    },
    /// A JSON boolean.
    Boolean,
    /// A closed set of allowed string values.
    Enum(Vec<String>),
    /// A homogeneous array of items matching a nested shape.
    Array {
        /// Shape each item must satisfy.
        items: Box<FieldType>,
        /// Maximum accepted item count.
        max_items: Option<usize>,
    },
    /// A nested object with its own field declarations.
    Object(Box<ArgSchema>),
}

/// The declared shape of a tool's arguments object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArgSchema {
    /// Field name to declared type.
    pub fields: Vec<(String, FieldType)>,
    /// Field names that must be present.
    pub required: Vec<String>,
    /// When true, any key not named in `fields` is rejected.
    pub additional_properties: bool,
}

// ============================================================================
// SECTION: Validation Options
// ============================================================================

/// Tunables applied on top of the declared [`ArgSchema`] (spec.md §4.11).
#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    /// Overrides every string field's cap with a single ceiling, whichever
    /// is smaller, when set.
    pub max_string_length: Option<usize>,
    /// Substrings that are never permitted inside a string value.
    pub disallow_patterns: Vec<String>,
    /// Dotted field paths whose values are replaced with a redaction marker
    /// in the sanitized copy returned alongside validation, so they never
    /// reach the audit trail verbatim.
    pub redact_fields: Vec<String>,
}

/// The redaction marker substituted for values named in `redact_fields`.
pub const REDACTED_MARKER: &str = "[redacted]";

// ============================================================================
// SECTION: Result
// ============================================================================

/// Outcome of validating a tool invocation's arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    /// Whether every declared constraint was satisfied.
    pub valid: bool,
    /// Human-readable reason for the first failure encountered, if any.
    pub error: Option<String>,
    /// A redaction-applied copy of the input, present only when valid.
    pub sanitized_args: Option<Value>,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Validates `args` against `schema`, applying `options` on top.
///
/// Returns a [`ValidationOutcome`] rather than a `Result`: a failed
/// validation is an expected business outcome to be audited, not an
/// exceptional control-flow path.
#[must_use]
pub fn validate_arguments(
    schema: &ArgSchema,
    args: &Value,
    options: &ValidationOptions,
) -> ValidationOutcome {
    let object = match args.as_object() {
        Some(object) => object,
        None => {
            return failure("arguments must be a JSON object");
        }
    };

    if let Err(message) = check_object(schema, object, options, "") {
        return failure(message);
    }

    let sanitized = redact(args, &options.redact_fields, "");
    ValidationOutcome {
        valid: true,
        error: None,
        sanitized_args: Some(sanitized),
    }
}

fn failure(message: impl Into<String>) -> ValidationOutcome {
    ValidationOutcome {
        valid: false,
        error: Some(message.into()),
        sanitized_args: None,
    }
}

// ============================================================================
// SECTION: Recursive Shape Checking
// ============================================================================

fn check_object(
    schema: &ArgSchema,
    object: &Map<String, Value>,
    options: &ValidationOptions,
    path: &str,
) -> Result<(), String> {
    for required in &schema.required {
        if !object.contains_key(required) {
            return Err(format!("missing required field '{}'", join_path(path, required)));
        }
    }

    if !schema.additional_properties {
        for key in object.keys() {
            if !schema.fields.iter().any(|(name, _)| name == key) {
                return Err(format!("unexpected field '{}'", join_path(path, key)));
            }
        }
    }

    for (name, field_type) in &schema.fields {
        let Some(value) = object.get(name) else {
            continue;
        };
        check_value(field_type, value, options, &join_path(path, name))?;
    }

    Ok(())
}

fn check_value(
    field_type: &FieldType,
    value: &Value,
    options: &ValidationOptions,
    path: &str,
) -> Result<(), String> {
    match field_type {
        FieldType::String { max_length } => {
            let text = value
                .as_str()
                .ok_or_else(|| format!("'{path}' must be a string"))?;
            let effective_cap = match (*max_length, options.max_string_length) {
                (Some(declared), Some(global)) => Some(declared.min(global)),
                (Some(declared), None) => Some(declared),
                (None, Some(global)) => Some(global),
                (None, None) => None,
            };
            if let Some(cap) = effective_cap {
                if text.len() > cap {
                    return Err(format!("'{path}' exceeds maximum length {cap}"));
                }
            }
            for pattern in &options.disallow_patterns {
                if !pattern.is_empty() && text.contains(pattern.as_str()) {
                    return Err(format!("'{path}' contains a disallowed pattern"));
                }
            }
            Ok(())
        }
        FieldType::Integer { minimum, maximum } => {
            let number = value
                .as_i64()
                .ok_or_else(|| format!("'{path}' must be an integer"))?;
            if let Some(minimum) = minimum {
                if number < *minimum {
                    return Err(format!("'{path}' is below minimum {minimum}"));
                }
            }
            if let Some(maximum) = maximum {
                if number > *maximum {
                    return Err(format!("'{path}' exceeds maximum {maximum}"));
                }
            }
            Ok(())
        }
        FieldType::Number { minimum, maximum } => {
            let number = value
                .as_f64()
                .ok_or_else(|| format!("'{path}' must be a number"))?;
            if let Some(minimum) = minimum {
                if number < *minimum {
                    return Err(format!("'{path}' is below minimum {minimum}"));
                }
            }
            if let Some(maximum) = maximum {
                if number > *maximum {
                    return Err(format!("'{path}' exceeds maximum {maximum}"));
                }
            }
            Ok(())
        }
        FieldType::Boolean => {
            if value.as_bool().is_none() {
                return Err(format!("'{path}' must be a boolean"));
            }
            Ok(())
        }
        FieldType::Enum(allowed) => {
            let text = value
                .as_str()
                .ok_or_else(|| format!("'{path}' must be a string"))?;
            if !allowed.iter().any(|candidate| candidate == text) {
                return Err(format!("'{path}' is not one of the allowed values"));
            }
            Ok(())
        }
        FieldType::Array { items, max_items } => {
            let array = value
                .as_array()
                .ok_or_else(|| format!("'{path}' must be an array"))?;
            if let Some(max_items) = max_items {
                if array.len() > *max_items {
                    return Err(format!("'{path}' exceeds maximum item count {max_items}"));
                }
            }
            for (index, item) in array.iter().enumerate() {
                check_value(items, item, options, &format!("{path}[{index}]"))?;
            }
            Ok(())
        }
        FieldType::Object(nested) => {
            let object = value
                .as_object()
                .ok_or_else(|| format!("'{path}' must be an object"))?;
            check_object(nested, object, options, path)
        }
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

// ============================================================================
// SECTION: Redaction
// ============================================================================

fn redact(value: &Value, redact_fields: &[String], path: &str) -> Value {
    match value {
        Value::Object(object) => {
            let mut out = Map::with_capacity(object.len());
            for (key, child) in object {
                let child_path = join_path(path, key);
                if redact_fields.iter().any(|field| field == &child_path) {
                    out.insert(key.clone(), Value::String(REDACTED_MARKER.to_string()));
                } else {
                    out.insert(key.clone(), redact(child, redact_fields, &child_path));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact(item, redact_fields, path))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_schema() -> ArgSchema {
        ArgSchema {
            fields: vec![
                (
                    "repo".to_string(),
                    FieldType::String { max_length: Some(100) },
                ),
                (
                    "count".to_string(),
                    FieldType::Integer {
                        minimum: Some(0),
                        maximum: Some(10),
                    },
                ),
                (
                    "visibility".to_string(),
                    FieldType::Enum(vec!["public".to_string(), "private".to_string()]),
                ),
            ],
            required: vec!["repo".to_string()],
            additional_properties: false,
        }
    }

    #[test]
    fn accepts_well_formed_arguments() {
        let schema = sample_schema();
        let args = json!({"repo": "octo/hello", "count": 3, "visibility": "public"});
        let outcome = validate_arguments(&schema, &args, &ValidationOptions::default());
        assert!(outcome.valid);
        assert_eq!(outcome.sanitized_args, Some(args));
    }

    #[test]
    fn rejects_missing_required_field() {
        let schema = sample_schema();
        let args = json!({"count": 3});
        let outcome = validate_arguments(&schema, &args, &ValidationOptions::default());
        assert!(!outcome.valid);
        assert!(outcome.error.unwrap().contains("repo"));
    }

    #[test]
    fn rejects_unexpected_field_when_additional_properties_is_false() {
        let schema = sample_schema();
        let args = json!({"repo": "octo/hello", "extra": true});
        let outcome = validate_arguments(&schema, &args, &ValidationOptions::default());
        assert!(!outcome.valid);
        assert!(outcome.error.unwrap().contains("extra"));
    }

    #[test]
    fn rejects_out_of_range_integer() {
        let schema = sample_schema();
        let args = json!({"repo": "octo/hello", "count": 99});
        let outcome = validate_arguments(&schema, &args, &ValidationOptions::default());
        assert!(!outcome.valid);
    }

    #[test]
    fn rejects_value_outside_enum() {
        let schema = sample_schema();
        let args = json!({"repo": "octo/hello", "visibility": "internal"});
        let outcome = validate_arguments(&schema, &args, &ValidationOptions::default());
        assert!(!outcome.valid);
    }

    #[test]
    fn enforces_global_max_string_length_even_when_tighter_than_declared() {
        let schema = sample_schema();
        let args = json!({"repo": "a_very_long_repository_name_indeed"});
        let options = ValidationOptions {
            max_string_length: Some(5),
            ..ValidationOptions::default()
        };
        let outcome = validate_arguments(&schema, &args, &options);
        assert!(!outcome.valid);
    }

    #[test]
    fn disallow_patterns_reject_matching_substrings() {
        let schema = sample_schema();
        let args = json!({"repo": "octo/../etc/passwd"});
        let options = ValidationOptions {
            disallow_patterns: vec!["..".to_string()],
            ..ValidationOptions::default()
        };
        let outcome = validate_arguments(&schema, &args, &options);
        assert!(!outcome.valid);
    }

    #[test]
    fn redact_fields_replace_values_in_sanitized_copy_only() {
        let schema = ArgSchema {
            fields: vec![
                ("repo".to_string(), FieldType::String { max_length: None }),
                ("token".to_string(), FieldType::String { max_length: None }),
            ],
            required: vec![],
            additional_properties: false,
        };
        let args = json!({"repo": "octo/hello", "token": "shhh"});
        let options = ValidationOptions {
            redact_fields: vec!["token".to_string()],
            ..ValidationOptions::default()
        };
        let outcome = validate_arguments(&schema, &args, &options);
        assert!(outcome.valid);
        let sanitized = outcome.sanitized_args.expect("sanitized copy present");
        assert_eq!(sanitized["token"], json!(REDACTED_MARKER));
        assert_eq!(sanitized["repo"], json!("octo/hello"));
    }

    #[test]
    fn nested_arrays_and_objects_validate_recursively() {
        let schema = ArgSchema {
            fields: vec![(
                "items".to_string(),
                FieldType::Array {
                    items: Box::new(FieldType::Object(Box::new(ArgSchema {
                        fields: vec![("id".to_string(), FieldType::Integer { minimum: Some(1), maximum: None })],
                        required: vec!["id".to_string()],
                        additional_properties: false,
                    }))),
                    max_items: Some(2),
                },
            )],
            required: vec![],
            additional_properties: false,
        };
        let valid_args = json!({"items": [{"id": 1}, {"id": 2}]});
        assert!(validate_arguments(&schema, &valid_args, &ValidationOptions::default()).valid);

        let too_many = json!({"items": [{"id": 1}, {"id": 2}, {"id": 3}]});
        assert!(!validate_arguments(&schema, &too_many, &ValidationOptions::default()).valid);

        let bad_item = json!({"items": [{"id": 0}]});
        assert!(!validate_arguments(&schema, &bad_item, &ValidationOptions::default()).valid);
    }

    #[test]
    fn rejects_non_object_arguments() {
        let schema = sample_schema();
        let outcome = validate_arguments(&schema, &json!("not-an-object"), &ValidationOptions::default());
        assert!(!outcome.valid);
    }
}

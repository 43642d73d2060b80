// ambassador-orchestrator/src/pipeline/schema.rs
// ============================================================================
// Module: Tool Schema Conversion
// Description: Converts a downstream tool's declared JSON Schema into the
//              Ambassador's closed ArgSchema shape language.
// Purpose: Let the pipeline run the hand-rolled, per-invocation argument
//          validator against schemas tool servers declare in ordinary JSON
//          Schema, without running a general schema engine on the hot path
//          (spec.md §4.11).
// Dependencies: ambassador_core, serde_json
// ============================================================================

//! ## Overview
//! Only the subset of JSON Schema the Ambassador's [`ArgSchema`] can
//! express is honored: `object`/`string`/`integer`/`number`/`boolean`/
//! `enum`/`array`, `properties`, `required`, and `additionalProperties`.
//! Anything else in a declared schema (e.g. `oneOf`, `$ref`, string
//! `format`) is silently ignored rather than rejected, since `jsonschema`
//! already validated the declared schema's own well-formedness at catalog
//! publish time; this conversion only needs to capture enough shape to
//! catch malformed arguments before they reach a downstream server, not to
//! re-validate the schema itself. A schema this conversion cannot make any
//! sense of at all (not a JSON object, or missing `type: object` at the
//! top level) degrades to the empty schema: arguments must still be a JSON
//! object, but no individual field is checked.

// ============================================================================
// SECTION: Imports
// ============================================================================

use ambassador_core::ArgSchema;
use ambassador_core::FieldType;
use serde_json::Value;

/// Converts a tool's declared JSON Schema into an [`ArgSchema`].
#[must_use]
pub fn arg_schema_from_json_schema(schema: &Value) -> ArgSchema {
    let Some(object) = schema.as_object() else {
        return ArgSchema::default();
    };

    let required: Vec<String> = object.get("required").and_then(Value::as_array).map(|values| values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()).unwrap_or_default();

    let additional_properties = object.get("additionalProperties").and_then(Value::as_bool).unwrap_or(true);

    let fields = object
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| properties.iter().map(|(name, value)| (name.clone(), field_type_from_json_schema(value))).collect())
        .unwrap_or_default();

    ArgSchema { fields, required, additional_properties }
}

fn field_type_from_json_schema(schema: &Value) -> FieldType {
    let Some(object) = schema.as_object() else {
        return FieldType::String { max_length: None };
    };

    if let Some(values) = object.get("enum").and_then(Value::as_array) {
        return FieldType::Enum(values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect());
    }

    match object.get("type").and_then(Value::as_str) {
        Some("string") => FieldType::String { max_length: object.get("maxLength").and_then(Value::as_u64).and_then(|n| usize::try_from(n).ok()) },
        Some("integer") => FieldType::Integer {
            minimum: object.get("minimum").and_then(Value::as_i64),
            maximum: object.get("maximum").and_then(Value::as_i64),
        },
        Some("number") => FieldType::Number {
            minimum: object.get("minimum").and_then(Value::as_f64),
            maximum: object.get("maximum").and_then(Value::as_f64),
        },
        Some("boolean") => FieldType::Boolean,
        Some("array") => {
            let items = object.get("items").map_or(FieldType::String { max_length: None }, field_type_from_json_schema);
            FieldType::Array { items: Box::new(items), max_items: object.get("maxItems").and_then(Value::as_u64).and_then(|n| usize::try_from(n).ok()) }
        }
        Some("object") => FieldType::Object(Box::new(arg_schema_from_json_schema(schema))),
        _ => FieldType::String { max_length: None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_a_flat_object_schema() {
        let schema = json!({
            "type": "object",
            "properties": {
                "repo": {"type": "string", "maxLength": 100},
                "count": {"type": "integer", "minimum": 0},
            },
            "required": ["repo"],
            "additionalProperties": false,
        });
        let converted = arg_schema_from_json_schema(&schema);
        assert_eq!(converted.required, vec!["repo".to_string()]);
        assert!(!converted.additional_properties);
        assert_eq!(converted.fields.len(), 2);
    }

    #[test]
    fn unparseable_schema_degrades_to_the_empty_schema() {
        let converted = arg_schema_from_json_schema(&json!("not a schema"));
        assert!(converted.fields.is_empty());
        assert!(converted.additional_properties);
    }

    #[test]
    fn enum_type_is_recognized_regardless_of_declared_type() {
        let schema = json!({
            "type": "object",
            "properties": {"mode": {"enum": ["a", "b"]}},
        });
        let converted = arg_schema_from_json_schema(&schema);
        let (_, field) = &converted.fields[0];
        assert_eq!(*field, FieldType::Enum(vec!["a".to_string(), "b".to_string()]));
    }
}

//! Argument validation against a plugin's declared JSON Schema.
//!
//! Covers the subset plugin schemas actually use: an object at the top
//! level, `required`, per-property `type` and `enum`, and
//! `additionalProperties: false`. Nested objects are type-checked but not
//! descended into.

use serde_json::Value;

/// Check `arguments` against `schema`. The error string is meant for the model.
pub fn validate(schema: &Value, arguments: &Value) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !matches_type(expected, arguments) {
            return Err(format!(
                "expected arguments of type {expected}, got {}",
                type_name(arguments)
            ));
        }
    }

    let Some(object) = arguments.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(field) {
                return Err(format!("missing required argument '{field}'"));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in object {
        let Some(property) = properties.and_then(|p| p.get(key)) else {
            if closed {
                return Err(format!("unexpected argument '{key}'"));
            }
            continue;
        };

        if let Some(expected) = property.get("type").and_then(Value::as_str) {
            if !matches_type(expected, value) {
                return Err(format!(
                    "argument '{key}' must be of type {expected}, got {}",
                    type_name(value)
                ));
            }
        }

        if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(format!("argument '{key}' must be one of {}", Value::Array(allowed.clone())));
            }
        }
    }

    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "null" => value.is_null(),
        // Unknown type keywords are not enforced.
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

//! Validate call arguments against JSON Schema before execution.

use serde_json::Value;

/// Validate arguments against a JSON Schema.
///
/// Supports the subset agents actually declare: `type` (string or list),
/// `enum`, `required`, `properties` and `items`, applied recursively.
/// Unknown keywords are ignored. Returns `Err(message)` describing the first
/// violation found.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    check(args, schema, "")
}

fn check(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(|t| t.as_str()).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| value_matches_type(value, t)) {
            let expected = allowed.join("|");
            return Err(if path.is_empty() {
                format!("expected {expected} arguments, got {}", json_type_name(value))
            } else {
                format!(
                    "field '{path}' expected type '{expected}', got {}",
                    json_type_name(value)
                )
            });
        }
    }

    if let Some(options) = schema.get("enum").and_then(|v| v.as_array()) {
        if !options.contains(value) {
            let listed = options
                .iter()
                .map(|o| o.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(format!("field '{path}' must be one of [{listed}]"));
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
            for name in required.iter().filter_map(|f| f.as_str()) {
                if !obj.contains_key(name) {
                    return Err(format!("missing required field '{}'", join(path, name)));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
            for (key, field) in obj {
                if let Some(field_schema) = properties.get(key) {
                    check(field, field_schema, &join(path, key))?;
                }
            }
        }
    }

    if let (Some(items), Some(array)) = (schema.get("items"), value.as_array()) {
        for (i, item) in array.iter().enumerate() {
            check(item, items, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

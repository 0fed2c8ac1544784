//! Per-provider JSON Schema dialect transforms.
//!
//! One canonical schema is stored per role; structured-output APIs disagree
//! about what they accept, so each provider family gets its own variant.
//! Every transform is a pure function of the canonical schema and is
//! deterministic: the same input always yields byte-identical output.

use serde_json::{Map, Value};

/// `format` values OpenAI strict mode accepts; everything else is stripped.
const OPENAI_SUPPORTED_FORMATS: &[&str] = &[
    "date-time", "time", "date", "duration", "email", "hostname", "ipv4", "ipv6", "uuid",
];

/// Meta fields the Claude API rejects.
const CLAUDE_META_FIELDS: &[&str] = &["$schema", "$id", "$comment"];

/// Schema keywords the Gemini API does not understand.
const GEMINI_UNSUPPORTED_FIELDS: &[&str] = &[
    "title",
    "additionalProperties",
    "default",
    "examples",
    "minLength",
    "maxLength",
    "minimum",
    "maximum",
    "pattern",
    "format",
    "minItems",
    "maxItems",
    "uniqueItems",
    "$schema",
];

fn is_object_schema(value: &Value) -> bool {
    value.get("type").and_then(|t| t.as_str()) == Some("object")
}

/// Transform a canonical schema for OpenAI strict mode.
///
/// Strict mode requires every declared property to be required and every
/// object to forbid additional properties, recursively. `$schema` is
/// dropped and unsupported `format` values are stripped.
pub fn to_openai_strict(schema: &Value) -> Value {
    let Value::Object(fields) = schema else {
        return schema.clone();
    };

    let mut result = Map::new();

    for (key, value) in fields {
        match key.as_str() {
            "$schema" | "additionalProperties" | "required" => continue,
            "format" => {
                if let Some(format) = value.as_str() {
                    if OPENAI_SUPPORTED_FORMATS.contains(&format) {
                        result.insert(key.clone(), value.clone());
                    }
                }
            }
            "properties" => {
                if let Value::Object(props) = value {
                    let transformed: Map<String, Value> = props
                        .iter()
                        .map(|(name, prop)| (name.clone(), transform_property(prop)))
                        .collect();
                    result.insert("required".to_string(), Value::Array(
                        props.keys().map(|k| Value::String(k.clone())).collect(),
                    ));
                    result.insert(key.clone(), Value::Object(transformed));
                } else {
                    result.insert(key.clone(), value.clone());
                }
            }
            "items" => {
                result.insert(key.clone(), transform_property(value));
            }
            _ => {
                if is_object_schema(value) {
                    result.insert(key.clone(), to_openai_strict(value));
                } else {
                    result.insert(key.clone(), value.clone());
                }
            }
        }
    }

    if is_object_schema(schema) {
        result.insert("additionalProperties".to_string(), Value::Bool(false));
    }

    Value::Object(result)
}

fn transform_property(prop: &Value) -> Value {
    if !prop.is_object() {
        return prop.clone();
    }
    match prop.get("type").and_then(|t| t.as_str()) {
        Some("object") => to_openai_strict(prop),
        Some("array") => {
            let mut out = prop.as_object().cloned().unwrap_or_default();
            if let Some(items) = prop.get("items") {
                out.insert("items".to_string(), transform_property(items));
            }
            strip_unsupported_format(&mut out);
            Value::Object(out)
        }
        _ => {
            let mut out = prop.as_object().cloned().unwrap_or_default();
            strip_unsupported_format(&mut out);
            Value::Object(out)
        }
    }
}

fn strip_unsupported_format(fields: &mut Map<String, Value>) {
    let keep = fields
        .get("format")
        .and_then(|f| f.as_str())
        .map(|f| OPENAI_SUPPORTED_FORMATS.contains(&f))
        .unwrap_or(true);
    if !keep {
        fields.remove("format");
    }
}

/// Strip JSON Schema meta fields the Claude API rejects, recursively.
pub fn to_claude(schema: &Value) -> Value {
    match schema {
        Value::Object(fields) => {
            let mut result = Map::new();
            for (key, value) in fields {
                if CLAUDE_META_FIELDS.contains(&key.as_str()) {
                    continue;
                }
                result.insert(key.clone(), to_claude(value));
            }
            Value::Object(result)
        }
        Value::Array(items) => Value::Array(items.iter().map(to_claude).collect()),
        other => other.clone(),
    }
}

/// Strip schema keywords Gemini does not support, recursively.
///
/// `title` is removed only where it appears as a schema keyword; a property
/// *named* `title` under `properties` survives, because there the key is a
/// property name, not a keyword.
pub fn to_gemini(schema: &Value) -> Value {
    let Value::Object(fields) = schema else {
        return schema.clone();
    };

    let mut result = Map::new();
    for (key, value) in fields {
        if GEMINI_UNSUPPORTED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        match key.as_str() {
            "properties" => {
                if let Value::Object(props) = value {
                    let transformed: Map<String, Value> = props
                        .iter()
                        .map(|(name, prop)| (name.clone(), to_gemini(prop)))
                        .collect();
                    result.insert(key.clone(), Value::Object(transformed));
                } else {
                    result.insert(key.clone(), value.clone());
                }
            }
            _ => match value {
                Value::Object(_) => {
                    result.insert(key.clone(), to_gemini(value));
                }
                Value::Array(items) => {
                    result.insert(
                        key.clone(),
                        Value::Array(items.iter().map(to_gemini).collect()),
                    );
                }
                _ => {
                    result.insert(key.clone(), value.clone());
                }
            },
        }
    }

    Value::Object(result)
}

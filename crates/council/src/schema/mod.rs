//! Canonical role schemas: loading, validation, and JSON extraction.
//!
//! Validation always runs against the canonical schema, never against a
//! provider-transformed variant.

pub mod transform;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::CouncilError;

/// Strict allowlist for role and schema names. Anything else is rejected
/// before a file path is ever built from it.
static VALID_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("valid pattern"));

pub fn validate_name(name: &str, resource: &str) -> Result<(), CouncilError> {
    if name.is_empty() {
        return Err(CouncilError::Configuration(format!(
            "{} name cannot be empty",
            resource
        )));
    }
    if !VALID_NAME.is_match(name) {
        return Err(CouncilError::Configuration(format!(
            "invalid {} name '{}': must match ^[a-z0-9][a-z0-9_-]*$",
            resource, name
        )));
    }
    Ok(())
}

fn ensure_contained(path: &Path, base: &Path) -> Result<(), CouncilError> {
    let resolved = path
        .canonicalize()
        .map_err(|e| CouncilError::Schema(format!("cannot resolve {}: {}", path.display(), e)))?;
    let base = base
        .canonicalize()
        .map_err(|e| CouncilError::Schema(format!("cannot resolve {}: {}", base.display(), e)))?;
    if !resolved.starts_with(&base) {
        return Err(CouncilError::Schema(format!(
            "schema path escapes allowed directory: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Built-in canonical schemas, one JSON file per role.
static BUILTIN_SCHEMAS: &[(&str, &str)] = &[
    ("drafter", include_str!("../../assets/schemas/drafter.json")),
    ("critic", include_str!("../../assets/schemas/critic.json")),
    ("planner", include_str!("../../assets/schemas/planner.json")),
    (
        "synthesizer",
        include_str!("../../assets/schemas/synthesizer.json"),
    ),
    (
        "researcher",
        include_str!("../../assets/schemas/researcher.json"),
    ),
    ("router", include_str!("../../assets/schemas/router.json")),
];

/// Catalog of canonical JSON Schemas indexed by role name.
///
/// Built-in schemas ship with the crate; a directory can override or extend
/// them.
pub struct SchemaCatalog {
    builtin: HashMap<&'static str, Value>,
    dir: Option<PathBuf>,
}

impl SchemaCatalog {
    pub fn builtin() -> Self {
        let builtin = BUILTIN_SCHEMAS
            .iter()
            .map(|(name, raw)| {
                let parsed: Value =
                    serde_json::from_str(raw).expect("built-in schema must be valid JSON");
                (*name, parsed)
            })
            .collect();
        SchemaCatalog { builtin, dir: None }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn load(&self, name: &str) -> Result<Value, CouncilError> {
        validate_name(name, "schema")?;

        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{}.json", name));
            if path.exists() {
                ensure_contained(&path, dir)?;
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| CouncilError::Schema(format!("read {}: {}", path.display(), e)))?;
                let parsed: Value = serde_json::from_str(&raw)
                    .map_err(|e| CouncilError::Schema(format!("parse {}: {}", path.display(), e)))?;
                if !parsed.is_object() {
                    return Err(CouncilError::Schema(format!(
                        "schema '{}' must be a JSON object",
                        name
                    )));
                }
                return Ok(parsed);
            }
        }

        self.builtin
            .get(name)
            .cloned()
            .ok_or_else(|| CouncilError::Schema(format!("schema not found: {}", name)))
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builtin.keys().map(|k| k.to_string()).collect();
        if let Some(dir) = &self.dir {
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) == Some("json") {
                        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                            names.push(stem.to_string());
                        }
                    }
                }
            }
        }
        names.sort();
        names.dedup();
        names
    }
}

/// Validate an instance against a canonical schema, returning one concise
/// line per violation for the synthesis retry prompt.
pub fn validate_instance(schema: &Value, instance: &Value) -> Vec<String> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(e) => return vec![format!("schema failed to compile: {}", e)],
    };

    validator
        .iter_errors(instance)
        .map(|error| {
            let path = error.instance_path.to_string();
            if path.is_empty() {
                error.to_string()
            } else {
                format!("{}: {}", path, error)
            }
        })
        .collect()
}

/// Extract the first JSON object from model output.
///
/// Handles markdown code fences and trailing commentary via balanced-brace
/// scanning, which survives braces inside string literals.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let mut cleaned = text.trim();

    if let Some(stripped) = cleaned.strip_prefix("```") {
        let stripped = stripped.strip_prefix("json").unwrap_or(stripped);
        cleaned = match stripped.rfind("```") {
            Some(end) => stripped[..end].trim(),
            None => stripped.trim_matches('`').trim(),
        };
    }

    if let Ok(parsed) = serde_json::from_str::<Value>(cleaned) {
        if parsed.is_object() {
            return Some(parsed);
        }
    }

    let candidate = extract_balanced(cleaned)?;
    serde_json::from_str::<Value>(candidate)
        .ok()
        .filter(|v| v.is_object())
}

fn extract_balanced(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_name_allows_kebab() {
        assert!(validate_name("test-designer", "subagent").is_ok());
        assert!(validate_name("red_team2", "subagent").is_ok());
    }

    #[test]
    fn test_validate_name_rejects_traversal() {
        assert!(validate_name("../etc/passwd", "schema").is_err());
        assert!(validate_name("", "schema").is_err());
        assert!(validate_name("Drafter", "schema").is_err());
        assert!(validate_name("-leading", "schema").is_err());
    }

    #[test]
    fn test_builtin_schemas_load() {
        let catalog = SchemaCatalog::builtin();
        for name in ["drafter", "critic", "planner", "synthesizer", "researcher", "router"] {
            let schema = catalog.load(name).unwrap();
            assert!(schema.is_object(), "{} should be an object schema", name);
        }
    }

    #[test]
    fn test_unknown_schema_errors() {
        let catalog = SchemaCatalog::builtin();
        assert!(catalog.load("nonexistent").is_err());
    }

    #[test]
    fn test_validate_instance_reports_paths() {
        let schema = json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer"},
                "name": {"type": "string"}
            },
            "required": ["count", "name"]
        });

        let errors = validate_instance(&schema, &json!({"count": "three"}));
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("count")));

        let errors = validate_instance(&schema, &json!({"count": 3, "name": "x"}));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_extract_json_direct() {
        let value = extract_json_object(r#"{"a": 1}"#).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_extract_json_from_fence() {
        let text = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json_object(text).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_extract_json_with_commentary() {
        let text = "Here is the result:\n{\"a\": {\"b\": 2}}\nHope that helps!";
        assert_eq!(extract_json_object(text).unwrap(), json!({"a": {"b": 2}}));
    }

    #[test]
    fn test_extract_json_braces_in_strings() {
        let text = r#"{"code": "fn main() { println!(\"{}\", 1); }"}"#;
        let value = extract_json_object(text).unwrap();
        assert!(value["code"].as_str().unwrap().contains("println"));
    }

    #[test]
    fn test_extract_json_rejects_non_object() {
        assert!(extract_json_object("[1, 2, 3]").is_none());
        assert!(extract_json_object("no json here").is_none());
    }
}
